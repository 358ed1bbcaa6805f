//! Decision engine: deny-list fast path first, oracle second.

use std::sync::Arc;

use tracing::debug;

use super::candidates::derive_candidates;
use super::denylist::DenyList;
use super::oracle::{OracleClient, OracleError};
use super::types::{ClassificationInput, Decision};

/// A decision plus the deny-list candidates it produced.
#[derive(Debug, Clone)]
pub struct Judgment {
    pub decision: Decision,
    /// Candidate deny-list terms derived from the manufacturer. Only set
    /// for genuine oracle "unrelated" verdicts.
    pub denylist_candidates: Vec<String>,
}

/// Combines the deny list and the oracle into one verdict per record.
pub struct DecisionEngine {
    oracle: Arc<dyn OracleClient>,
    brand_allow_list: Vec<String>,
}

impl DecisionEngine {
    pub fn new(oracle: Arc<dyn OracleClient>, brand_allow_list: Vec<String>) -> Self {
        Self {
            oracle,
            brand_allow_list,
        }
    }

    /// Judge one record. A deny-list hit never consults the oracle and
    /// never derives candidates; a fail-closed oracle verdict derives none
    /// either, so a parse failure cannot grow the deny list.
    pub fn decide(
        &self,
        deny: &DenyList,
        input: &ClassificationInput,
    ) -> Result<Judgment, OracleError> {
        if let Some(term) = deny.match_fields(&input.name, &input.manufacturer, &input.description)
        {
            debug!(term, name = %input.name, "Deny-list hit, skipping oracle");
            return Ok(Judgment {
                decision: Decision::denylist_match(term),
                denylist_candidates: Vec::new(),
            });
        }

        let decision = self.oracle.classify(input)?;

        let denylist_candidates = if !decision.is_related && !decision.fail_closed {
            derive_candidates(&input.manufacturer, &self.brand_allow_list)
        } else {
            Vec::new()
        };

        Ok(Judgment {
            decision,
            denylist_candidates,
        })
    }
}

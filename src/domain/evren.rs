use serde::{Deserialize, Serialize};

/// Evren's reply to one test case: the response text plus a free-text
/// description of the internal states it reports having detected.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvrenOutput {
    pub evren_response: String,
    pub detected_states: String,
}

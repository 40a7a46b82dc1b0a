//! The Think stage of an agent cycle: compose a prompt, call the LLM in
//! `quick` mode, and parse the response into a structured record.

use serde::{Deserialize, Serialize};

use crate::clock::CancelScope;
use crate::error::{CoreError, CoreResult, TransientKind};
use crate::llm::LlmGateway;
use crate::model::Mode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedThink {
    pub summary: String,
    pub insights: Vec<String>,
    pub next_actions: Vec<String>,
    pub confidence: f64,
    pub reasoning_chain: Vec<String>,
}

/// Parses the LLM's raw JSON response; on first failure callers should
/// retry once before surfacing `TransientError("think_parse")` (spec §4.2).
pub fn parse_think_output(raw: &str) -> CoreResult<ParsedThink> {
    serde_json::from_str(raw).map_err(|_| CoreError::TransientError { kind: TransientKind::ParseFailure })
}

/// Runs the Think stage: call the gateway in `quick` mode regardless of
/// the session's overall mode (spec §4.2), then parse, retrying the parse
/// once on failure.
pub async fn think(prompt: &str, llm: &LlmGateway, _session_mode: Mode, scope: &CancelScope) -> CoreResult<ParsedThink> {
    let raw = llm.generate(prompt, Mode::Quick, scope).await?;
    match parse_think_output(&raw) {
        Ok(parsed) => Ok(parsed),
        Err(_) => {
            let raw_retry = llm.generate(prompt, Mode::Quick, scope).await?;
            parse_think_output(&raw_retry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_json() {
        let raw = r#"{"summary":"s","insights":["a"],"next_actions":["b"],"confidence":0.8,"reasoning_chain":["c"]}"#;
        let parsed = parse_think_output(raw).unwrap();
        assert_eq!(parsed.summary, "s");
        assert_eq!(parsed.confidence, 0.8);
    }

    #[test]
    fn malformed_json_is_a_parse_failure() {
        let err = parse_think_output("not json").unwrap_err();
        assert!(matches!(
            err,
            CoreError::TransientError { kind: TransientKind::ParseFailure }
        ));
    }
}

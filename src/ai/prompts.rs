//! Advisor prompt construction. All prompt text lives here so it can be
//! reviewed and refined in one place.

use crate::assembler::AssembledContext;

const PRE_TRADE_ROLE: &str = "You are an AI assistant helping a trader evaluate a new trade \
before entry. Ask about the trading plan and the reasons for entering now. Focus on the \
trader's mentality and state of mind going into this trade, not on technicals or risk \
management. Ask one question at a time and keep the conversation going until a conclusion \
is reached.";

const MANAGEMENT_ROLE: &str = "You are an AI assistant helping a trader evaluate an existing \
open position for continuation, adjustment, or exit. Ask about the management plan for this \
trade and why the trader wants to change anything. Ask one question at a time and keep the \
conversation going until a conclusion is reached.";

/// Builds the system context message for an advisor session from the
/// assembled point-in-time context.
pub fn build_advisor_system_message(status: &str, context: &AssembledContext) -> String {
    let role_instruction = if status.eq_ignore_ascii_case("management") {
        MANAGEMENT_ROLE
    } else {
        PRE_TRADE_ROLE
    };

    let questionnaire = context
        .questionnaire
        .as_ref()
        .and_then(|answers| serde_json::to_string_pretty(answers).ok())
        .unwrap_or_else(|| "(not filled out yet)".to_string());

    let mut market_lines = Vec::new();
    for section in &context.market {
        match &section.payload {
            Some(payload) => {
                let freshness = if section.stale { " (stale)" } else { "" };
                market_lines.push(format!(
                    "{}{}:\n{}",
                    section.dataset,
                    freshness,
                    serde_json::to_string_pretty(payload)
                        .unwrap_or_else(|_| "(unreadable)".to_string())
                ));
            }
            None => market_lines.push(format!("{}: unavailable", section.dataset)),
        }
    }
    let market = if market_lines.is_empty() {
        "(no market data configured)".to_string()
    } else {
        market_lines.join("\n\n")
    };

    format!(
        "{role_instruction}\n\n\
        The trader filled out this questionnaire about things they have been working on:\n\
        {questionnaire}\n\n\
        Current market data for reference:\n{market}\n\n\
        Help the trader reflect on the objective they stated at the start before they act. \
        Do not mention risk management. Return only your answer, without restating what \
        was just said."
    )
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// The six fixed board roles: one router plus five specialists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardRole {
    /// Routes and synthesises; handles everything unclaimed.
    General,
    Finance,
    Research,
    Operations,
    Marketing,
    Legal,
}

pub const ALL_ROLES: [BoardRole; 6] = [
    BoardRole::General,
    BoardRole::Finance,
    BoardRole::Research,
    BoardRole::Operations,
    BoardRole::Marketing,
    BoardRole::Legal,
];

pub const SPECIALISTS: [BoardRole; 5] = [
    BoardRole::Finance,
    BoardRole::Research,
    BoardRole::Operations,
    BoardRole::Marketing,
    BoardRole::Legal,
];

impl BoardRole {
    pub fn as_str(self) -> &'static str {
        match self {
            BoardRole::General => "general",
            BoardRole::Finance => "finance",
            BoardRole::Research => "research",
            BoardRole::Operations => "operations",
            BoardRole::Marketing => "marketing",
            BoardRole::Legal => "legal",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BoardRole::General => "General Manager",
            BoardRole::Finance => "Finance Director",
            BoardRole::Research => "Research Director",
            BoardRole::Operations => "Operations Director",
            BoardRole::Marketing => "Marketing Director",
            BoardRole::Legal => "Legal Counsel",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            BoardRole::General => "🎯",
            BoardRole::Finance => "💰",
            BoardRole::Research => "🔬",
            BoardRole::Operations => "⚙️",
            BoardRole::Marketing => "📣",
            BoardRole::Legal => "⚖️",
        }
    }

    /// Built-in personality used when no soul file is configured.
    pub fn builtin_personality(self) -> &'static str {
        match self {
            BoardRole::General => {
                "You are the General Manager. You coordinate the board, answer \
                 anything that has no clear specialist owner, and you are the only \
                 one who may convene board meetings. Be decisive and brief."
            }
            BoardRole::Finance => {
                "You are the Finance Director. You think in budgets, cash flow, \
                 unit economics, and risk-adjusted returns. Always put numbers on \
                 your claims."
            }
            BoardRole::Research => {
                "You are the Research Director. You ground every recommendation in \
                 evidence, cite what you know and flag what you do not, and you are \
                 comfortable saying the data is inconclusive."
            }
            BoardRole::Operations => {
                "You are the Operations Director. You care about execution: \
                 processes, schedules, tooling, and what can actually be delivered \
                 with the people and systems at hand."
            }
            BoardRole::Marketing => {
                "You are the Marketing Director. You think in audiences, \
                 positioning, and channels, and you push for clarity of message \
                 over cleverness."
            }
            BoardRole::Legal => {
                "You are the Legal Counsel. You identify contractual, regulatory, \
                 and liability exposure, and you always state the risk before the \
                 mitigation."
            }
        }
    }

    /// Scored routing keywords.  A role claims a message only when its
    /// score is at least 3 AND at least twice the runner-up's.
    pub fn keywords(self) -> &'static [(&'static str, u32)] {
        match self {
            BoardRole::General => &[],
            BoardRole::Finance => &[
                ("budget", 2),
                ("invoice", 2),
                ("tax", 2),
                ("revenue", 1),
                ("cost", 1),
                ("cash", 1),
                ("profit", 1),
                ("pricing", 1),
                ("funding", 1),
            ],
            BoardRole::Research => &[
                ("research", 2),
                ("study", 1),
                ("data", 1),
                ("analysis", 1),
                ("experiment", 1),
                ("evidence", 1),
                ("benchmark", 1),
            ],
            BoardRole::Operations => &[
                ("operations", 2),
                ("incident", 2),
                ("deploy", 1),
                ("infrastructure", 1),
                ("process", 1),
                ("logistics", 1),
                ("schedule", 1),
                ("pipeline", 1),
            ],
            BoardRole::Marketing => &[
                ("marketing", 2),
                ("campaign", 2),
                ("seo", 2),
                ("brand", 1),
                ("audience", 1),
                ("launch", 1),
                ("social", 1),
                ("content", 1),
            ],
            BoardRole::Legal => &[
                ("legal", 2),
                ("contract", 2),
                ("compliance", 2),
                ("gdpr", 2),
                ("license", 1),
                ("liability", 1),
                ("terms", 1),
                ("policy", 1),
            ],
        }
    }
}

impl std::fmt::Display for BoardRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BoardRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(BoardRole::General),
            "finance" => Ok(BoardRole::Finance),
            "research" => Ok(BoardRole::Research),
            "operations" | "ops" => Ok(BoardRole::Operations),
            "marketing" => Ok(BoardRole::Marketing),
            "legal" => Ok(BoardRole::Legal),
            other => anyhow::bail!("unknown board role: {other}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_roles_one_general_five_specialists() {
        assert_eq!(ALL_ROLES.len(), 6);
        assert_eq!(SPECIALISTS.len(), 5);
        assert!(!SPECIALISTS.contains(&BoardRole::General));
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in ALL_ROLES {
            let parsed: BoardRole = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn ops_alias_parses() {
        assert_eq!("ops".parse::<BoardRole>().unwrap(), BoardRole::Operations);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("janitor".parse::<BoardRole>().is_err());
    }

    #[test]
    fn general_claims_no_keywords() {
        assert!(BoardRole::General.keywords().is_empty());
    }
}

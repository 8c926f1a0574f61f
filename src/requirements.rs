//! Tier-upgrade requirements
//!
//! Requirement strings come from tier configuration and take two shapes:
//!
//! ```text
//! permission:<capability>        → HolderContext::has_capability
//! <left> <op> <right>            → placeholders resolved, then compared
//!                                  op ∈ { >=, <=, >, <, ==, != }
//! ```
//!
//! Strings are parsed once into [`Requirement`] values. Blank lines and
//! `#` comments are dropped; anything else that does not parse is kept as
//! [`Rule::Unparseable`], logged as a configuration warning, and treated
//! as satisfied.

use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::core_types::AccountId;
use crate::external::HolderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl CompareOp {
    /// Two-character operators first so `>=` is not read as `>`
    const TOKENS: [(&'static str, CompareOp); 6] = [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    /// Numeric when both sides parse as decimals, otherwise
    /// case-insensitive equality; ordering operators on text never hold.
    pub fn compare(&self, left: &str, right: &str) -> bool {
        if let (Some(l), Some(r)) = (parse_number(left), parse_number(right)) {
            return match self {
                CompareOp::Ge => l >= r,
                CompareOp::Le => l <= r,
                CompareOp::Gt => l > r,
                CompareOp::Lt => l < r,
                CompareOp::Eq => l == r,
                CompareOp::Ne => l != r,
            };
        }
        match self {
            CompareOp::Eq => left.eq_ignore_ascii_case(right),
            CompareOp::Ne => !left.eq_ignore_ascii_case(right),
            _ => false,
        }
    }
}

/// Plain (`1500`, `-2.5`) or scientific (`1.5E3`) notation
fn parse_number(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Permission(String),
    Compare {
        left: String,
        op: CompareOp,
        right: String,
    },
    /// Kept so it can be reported; always satisfied
    Unparseable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementParseError {
    #[error("permission requirement has no capability name")]
    EmptyPermission,

    #[error("no comparison operator with operands on both sides")]
    NoComparison,
}

/// One configured requirement with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub raw: String,
    pub rule: Rule,
}

impl Requirement {
    /// `None` for blank lines and `#` comments
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            return None;
        }
        let rule = match parse_rule(text) {
            Ok(rule) => rule,
            Err(e) => {
                warn!(requirement = %text, error = %e, "Invalid requirement format, treating as satisfied");
                Rule::Unparseable
            }
        };
        Some(Self {
            raw: text.to_string(),
            rule,
        })
    }

    pub async fn is_met(&self, holder: &dyn HolderContext, account: &AccountId) -> bool {
        match &self.rule {
            Rule::Permission(name) => holder.has_capability(account, name).await,
            Rule::Compare { left, op, right } => {
                let left = holder.resolve(account, left).await;
                let right = holder.resolve(account, right).await;
                op.compare(left.trim(), right.trim())
            }
            Rule::Unparseable => true,
        }
    }
}

fn parse_rule(text: &str) -> Result<Rule, RequirementParseError> {
    if let Some(name) = text.strip_prefix("permission:") {
        let name = name.trim();
        if name.is_empty() {
            return Err(RequirementParseError::EmptyPermission);
        }
        return Ok(Rule::Permission(name.to_string()));
    }

    // Leftmost operator with a non-empty left operand
    for (idx, _) in text.char_indices().skip(1) {
        let rest = &text[idx..];
        let Some((token, op)) = CompareOp::TOKENS
            .iter()
            .find(|(token, _)| rest.starts_with(token))
        else {
            continue;
        };
        let left = text[..idx].trim();
        let right = rest[token.len()..].trim();
        if left.is_empty() || right.is_empty() {
            return Err(RequirementParseError::NoComparison);
        }
        return Ok(Rule::Compare {
            left: left.to_string(),
            op: *op,
            right: right.to_string(),
        });
    }
    Err(RequirementParseError::NoComparison)
}

/// Parsed requirement list of one tier
#[derive(Debug, Clone, Default)]
pub struct RequirementSet {
    requirements: Vec<Requirement>,
}

impl RequirementSet {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        Self {
            requirements: raw
                .iter()
                .filter_map(|r| Requirement::parse(r.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter()
    }

    /// Every unmet requirement, in configuration order
    pub async fn unmet(&self, holder: &dyn HolderContext, account: &AccountId) -> Vec<String> {
        let mut unmet = Vec::new();
        for requirement in &self.requirements {
            if !requirement.is_met(holder, account).await {
                unmet.push(requirement.raw.clone());
            }
        }
        unmet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::mock::MockHolder;

    #[test]
    fn test_parse_shapes() {
        let perm = Requirement::parse("permission:bank.gold").unwrap();
        assert_eq!(perm.rule, Rule::Permission("bank.gold".into()));

        let cmp = Requirement::parse("  %player_level% >= 20 ").unwrap();
        assert_eq!(
            cmp.rule,
            Rule::Compare {
                left: "%player_level%".into(),
                op: CompareOp::Ge,
                right: "20".into()
            }
        );
        assert_eq!(cmp.raw, "%player_level% >= 20");

        assert!(Requirement::parse("").is_none());
        assert!(Requirement::parse("# disabled").is_none());
    }

    #[test]
    fn test_leftmost_operator_wins() {
        let req = Requirement::parse("a<b>c").unwrap();
        assert_eq!(
            req.rule,
            Rule::Compare {
                left: "a".into(),
                op: CompareOp::Lt,
                right: "b>c".into()
            }
        );
    }

    #[test]
    fn test_unparseable_is_kept() {
        assert_eq!(
            Requirement::parse("be nice").unwrap().rule,
            Rule::Unparseable
        );
        assert_eq!(
            Requirement::parse(">= 5").unwrap().rule,
            Rule::Unparseable
        );
        assert_eq!(
            Requirement::parse("permission:").unwrap().rule,
            Rule::Unparseable
        );
    }

    #[test]
    fn test_compare_numeric_then_text() {
        assert!(CompareOp::Ge.compare("20", "20.0"));
        assert!(CompareOp::Lt.compare("9.5", "10"));
        assert!(CompareOp::Eq.compare("Nether", "nether"));
        assert!(CompareOp::Ne.compare("nether", "overworld"));
        assert!(!CompareOp::Gt.compare("b", "a"));
    }

    #[test]
    fn test_compare_scientific_notation() {
        assert!(CompareOp::Ge.compare("1.5E3", "1500"));
        assert!(CompareOp::Lt.compare("2e2", "250"));
        assert!(CompareOp::Eq.compare("1E1", "10"));
        assert!(!CompareOp::Gt.compare("1.5E3", "2000"));
    }

    #[tokio::test]
    async fn test_unmet_lists_every_failure() {
        let holder = MockHolder::new();
        holder.set_placeholder("%player_level%", "7");
        holder.set_placeholder("%world%", "Overworld");
        let set = RequirementSet::parse(&[
            "permission:bank.gold",
            "%player_level% >= 10",
            "%world% == overworld",
            "nonsense",
        ]);

        let unmet = set.unmet(&holder, &AccountId::new()).await;
        assert_eq!(unmet, vec!["permission:bank.gold", "%player_level% >= 10"]);

        holder.grant("bank.gold");
        holder.set_placeholder("%player_level%", "10");
        assert!(set.unmet(&holder, &AccountId::new()).await.is_empty());
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

static REGION_CODE_RE: OnceLock<Regex> = OnceLock::new();

fn region_code_re() -> &'static Regex {
    REGION_CODE_RE.get_or_init(|| Regex::new(r"^[a-z]{2,3}$").expect("valid region code regex"))
}

/// Short lowercase tag for a geographic area, e.g. `ap` or `ts`.
///
/// Construction trims and lowercases, so comparisons are case-insensitive
/// exact matches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    pub fn new(raw: &str) -> Option<Self> {
        let code = raw.trim().to_lowercase();
        if code.is_empty() {
            None
        } else {
            Some(Self(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RegionCode {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        RegionCode::new(&raw).ok_or_else(|| "empty region code".to_string())
    }
}

impl From<RegionCode> for String {
    fn from(code: RegionCode) -> Self {
        code.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a comma-separated region list (as sent in a query string) into codes.
/// Blank entries are dropped; duplicates collapse.
pub fn parse_region_codes(raw: &str) -> BTreeSet<RegionCode> {
    raw.split(',').filter_map(RegionCode::new).collect()
}

/// Which readers an article is visible to.
///
/// Serializes as `null` for universal articles and as an array of codes
/// otherwise, matching the `regions` column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(
    from = "Option<BTreeSet<RegionCode>>",
    into = "Option<BTreeSet<RegionCode>>"
)]
pub enum RegionScope {
    #[default]
    Universal,
    ScopedTo(BTreeSet<RegionCode>),
}

impl RegionScope {
    /// An empty code set is universal.
    pub fn scoped(codes: impl IntoIterator<Item = RegionCode>) -> Self {
        let codes: BTreeSet<RegionCode> = codes.into_iter().collect();
        if codes.is_empty() {
            RegionScope::Universal
        } else {
            RegionScope::ScopedTo(codes)
        }
    }

    pub fn codes(&self) -> Option<&BTreeSet<RegionCode>> {
        match self {
            RegionScope::Universal => None,
            RegionScope::ScopedTo(codes) => Some(codes),
        }
    }

    pub(crate) fn to_column(&self) -> Result<Option<String>> {
        match self {
            RegionScope::Universal => Ok(None),
            RegionScope::ScopedTo(codes) => Ok(Some(serde_json::to_string(codes)?)),
        }
    }

    pub(crate) fn from_column(value: Option<&str>) -> serde_json::Result<Self> {
        match value {
            None => Ok(RegionScope::Universal),
            Some(json) => {
                let codes: BTreeSet<RegionCode> = serde_json::from_str(json)?;
                Ok(RegionScope::scoped(codes))
            }
        }
    }
}

impl From<Option<BTreeSet<RegionCode>>> for RegionScope {
    fn from(codes: Option<BTreeSet<RegionCode>>) -> Self {
        match codes {
            None => RegionScope::Universal,
            Some(codes) => RegionScope::scoped(codes),
        }
    }
}

impl From<RegionScope> for Option<BTreeSet<RegionCode>> {
    fn from(scope: RegionScope) -> Self {
        match scope {
            RegionScope::Universal => None,
            RegionScope::ScopedTo(codes) => Some(codes),
        }
    }
}

/// The set of region codes editors are allowed to attach to articles.
#[derive(Debug, Clone)]
pub struct RegionCatalog {
    codes: BTreeSet<RegionCode>,
}

impl RegionCatalog {
    pub fn new(codes: &[String]) -> Result<Self> {
        let mut recognized = BTreeSet::new();
        for raw in codes {
            let code = RegionCode::new(raw)
                .filter(|code| region_code_re().is_match(code.as_str()))
                .ok_or_else(|| AppError::Config(format!("malformed region code {:?}", raw)))?;
            recognized.insert(code);
        }
        if recognized.is_empty() {
            return Err(AppError::Config("region_codes must not be empty".into()));
        }
        Ok(Self { codes: recognized })
    }

    pub fn contains(&self, code: &RegionCode) -> bool {
        self.codes.contains(code)
    }

    pub fn recognize(&self, raw: &str) -> Result<RegionCode> {
        RegionCode::new(raw)
            .filter(|code| self.contains(code))
            .ok_or_else(|| AppError::InvalidRegion(raw.trim().to_string()))
    }

    /// Build an article scope from editor input, rejecting unknown codes.
    pub fn scope_for(&self, raw_codes: &[String]) -> Result<RegionScope> {
        let codes = raw_codes
            .iter()
            .map(|raw| self.recognize(raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(RegionScope::scoped(codes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RegionCatalog {
        RegionCatalog::new(&["ap".into(), "ts".into(), "mh".into()]).unwrap()
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(RegionCode::new("  AP ").unwrap().as_str(), "ap");
        assert!(RegionCode::new("   ").is_none());
    }

    #[test]
    fn query_list_parsing() {
        let codes = parse_region_codes("ap, TS,,ap , ");
        let codes: Vec<&str> = codes.iter().map(RegionCode::as_str).collect();
        assert_eq!(codes, vec!["ap", "ts"]);
        assert!(parse_region_codes("").is_empty());
    }

    #[test]
    fn empty_scope_is_universal() {
        assert_eq!(RegionScope::scoped(Vec::new()), RegionScope::Universal);
        assert_eq!(catalog().scope_for(&[]).unwrap(), RegionScope::Universal);
    }

    #[test]
    fn catalog_rejects_unknown_codes() {
        let catalog = catalog();
        let scope = catalog.scope_for(&["MH".into()]).unwrap();
        assert_eq!(
            scope.codes().unwrap().iter().next().map(RegionCode::as_str),
            Some("mh")
        );

        let err = catalog.scope_for(&["ap".into(), "xx".into()]).unwrap_err();
        assert!(matches!(err, AppError::InvalidRegion(code) if code == "xx"));
    }

    #[test]
    fn catalog_rejects_malformed_entries() {
        assert!(RegionCatalog::new(&["andhra".into()]).is_err());
        assert!(RegionCatalog::new(&[]).is_err());
    }

    #[test]
    fn column_encoding() {
        assert_eq!(RegionScope::Universal.to_column().unwrap(), None);
        let scope = RegionScope::scoped(parse_region_codes("ts,ap"));
        let column = scope.to_column().unwrap();
        assert_eq!(column.as_deref(), Some(r#"["ap","ts"]"#));
        assert_eq!(RegionScope::from_column(column.as_deref()).unwrap(), scope);
        assert_eq!(RegionScope::from_column(Some("[]")).unwrap(), RegionScope::Universal);
    }

    #[test]
    fn scope_serializes_as_nullable_list() {
        let json = serde_json::to_string(&RegionScope::Universal).unwrap();
        assert_eq!(json, "null");
        let scope: RegionScope = serde_json::from_str(r#"["MH"]"#).unwrap();
        assert_eq!(scope, RegionScope::scoped(parse_region_codes("mh")));
    }
}

//! Include/exclude pattern predicate over branch names, paths and titles

use crate::error::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Serialized form of [`Criteria`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriteriaPatterns {
    /// Patterns of which at least one must match
    #[serde(default)]
    pub include: Vec<String>,
    /// Patterns of which none may match
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Compiled include/exclude predicate
///
/// Patterns are regular expressions matched anywhere in the subject unless
/// anchored. Criteria with neither include nor exclude patterns match
/// nothing, which makes `Criteria::default()` a safe "never" value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "CriteriaPatterns", into = "CriteriaPatterns")]
pub struct Criteria {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Criteria {
    /// Compile criteria from pattern lists
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let include = include
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = exclude
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { include, exclude })
    }

    /// Whether no pattern is configured
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Check whether `subject` satisfies the criteria
    pub fn is_met(&self, subject: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let included = self.include.is_empty() || self.include.iter().any(|r| r.is_match(subject));
        included && !self.exclude.iter().any(|r| r.is_match(subject))
    }
}

impl PartialEq for Criteria {
    fn eq(&self, other: &Self) -> bool {
        let same = |a: &[Regex], b: &[Regex]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.as_str() == y.as_str())
        };
        same(&self.include, &other.include) && same(&self.exclude, &other.exclude)
    }
}

impl TryFrom<CriteriaPatterns> for Criteria {
    type Error = Error;

    fn try_from(patterns: CriteriaPatterns) -> Result<Self, Error> {
        Self::new(&patterns.include, &patterns.exclude)
    }
}

impl From<Criteria> for CriteriaPatterns {
    fn from(criteria: Criteria) -> Self {
        Self {
            include: criteria.include.iter().map(|r| r.as_str().to_string()).collect(),
            exclude: criteria.exclude.iter().map(|r| r.as_str().to_string()).collect(),
        }
    }
}

//! Rule-driven category tagging for unique candidates.

use std::path::Path;

use anyhow::{Context, Result};
use jobhub_core::JobDraft;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SalaryRule {
    pub category: String,
    /// Tag postings whose advertised maximum (or minimum) reaches this.
    pub min_salary: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRules {
    #[allow(dead_code)]
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    pub rules: Vec<CategoryRule>,
    #[serde(default)]
    pub salary: Option<SalaryRule>,
}

fn default_version() -> u32 {
    1
}

fn rule(category: &str, needles: &[&str]) -> CategoryRule {
    CategoryRule {
        category: category.to_string(),
        contains_any: needles.iter().map(|n| n.to_string()).collect(),
    }
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self {
            version: 1,
            rules: vec![
                rule(
                    "visa-sponsoring",
                    &["visa sponsorship", "sponsor visa", "h-1b", "h1b", "relocation support"],
                ),
                rule("startup", &["startup", "start-up", "seed-stage", "series a", "series b"]),
                rule("remote", &["remote", "work from home", "distributed team"]),
            ],
            salary: Some(SalaryRule {
                category: "high-pay".to_string(),
                min_salary: 150_000.0,
            }),
        }
    }
}

impl CategoryRules {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing category rules")
    }

    /// Load the rules file, falling back to the built-in set when it is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "category rules file not found; using built-in rules");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Add matching categories to `draft`, keeping any it already carries.
    pub fn tag(&self, draft: &mut JobDraft) {
        let combined = format!(
            "{} {} {} {}",
            draft.title, draft.location, draft.description, draft.full_description
        )
        .to_lowercase();

        let mut categories = std::mem::take(&mut draft.categories);
        for rule in &self.rules {
            if rule
                .contains_any
                .iter()
                .any(|needle| combined.contains(&needle.to_lowercase()))
            {
                categories.push(rule.category.clone());
            }
        }
        if let Some(salary) = &self.salary {
            let best = draft.salary_max.or(draft.salary_min).unwrap_or(0.0);
            if best >= salary.min_salary {
                categories.push(salary.category.clone());
            }
        }
        categories.sort();
        categories.dedup();
        draft.categories = categories;
    }

    pub fn apply(&self, drafts: &mut [JobDraft]) {
        for draft in drafts {
            self.tag(draft);
        }
    }
}

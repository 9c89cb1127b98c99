use regex::{Regex, RegexBuilder};

use crate::config::{RuleEntry, RulesConfig};
use crate::domain::{Classification, NormalizedRecall, RecallClass};
use crate::error::RecallError;

pub const DEFAULT_CATEGORY: &str = "Unclassified";

/// Built-in category rules. Specific organisms come before the generic
/// "bacteri" catch-all. Patterns name hazards only, never foods: a product
/// word in the title ("soy sauce", "peanut butter") must not decide the
/// category.
pub const CATEGORY_RULES: &[(&str, &str)] = &[
    (
        r"listeria|salmonella|\be\.?\s*coli\b|escherichia|clostridium|botulin|bacillus|cronobacter|staphylococc|shigella|campylobacter|vibrio|yersinia",
        "Bacteria",
    ),
    (r"bacteri|microbial|microbiological", "Bacteria"),
    (r"norovirus|hepatitis\s*a|virus", "Virus"),
    (r"parasit|cyclospora|trichinella|anisakis", "Parasite"),
    (
        r"undeclared|allergen|allergy",
        "Allergen",
    ),
    (
        r"extraneous|foreign\s+(matter|material|object)|\b(glass|metal|plastic|rocks?|stones?|wood)\b",
        "Extraneous material",
    ),
    (r"\bmou?ld|yeast|spoil", "Spoilage"),
    (
        r"chemical|\blead\b|mercury|arsenic|cadmium|pesticide|histamine|mycotoxin|patulin|aflatoxin|toxin",
        "Chemical",
    ),
    (
        r"temperature\s+abuse|under-?process|improper(ly)?\s+(seal|process)|container\s+integrity|swell",
        "Processing defect",
    ),
    (
        r"label|unregistered|unlicen[cs]ed|unauthori[sz]ed|non-?compliant",
        "Regulatory",
    ),
];

pub const MAIN_ISSUE_RULES: &[(&str, &str)] = &[
    (
        r"listeria|salmonella|\be\.?\s*coli\b|escherichia|clostridium|botulin|bacillus|cronobacter|staphylococc|shigella|campylobacter|vibrio|yersinia|bacteri|microbial|microbiological|norovirus|hepatitis\s*a|virus|parasit|cyclospora|trichinella|anisakis",
        "Biological contamination",
    ),
    (
        r"undeclared|allergen|allergy",
        "Undeclared allergen",
    ),
    (
        r"extraneous|foreign\s+(matter|material|object)|\b(glass|metal|plastic|rocks?|stones?|wood)\b",
        "Extraneous material",
    ),
    (r"\bmou?ld|yeast|spoil", "Spoilage"),
    (
        r"chemical|\blead\b|mercury|arsenic|cadmium|pesticide|histamine|mycotoxin|patulin|aflatoxin|toxin",
        "Chemical contamination",
    ),
    (
        r"temperature\s+abuse|under-?process|improper(ly)?\s+(seal|process)|container\s+integrity|swell",
        "Processing defect",
    ),
    (
        r"label|unregistered|unlicen[cs]ed|unauthori[sz]ed|non-?compliant",
        "Labelling or regulatory non-compliance",
    ),
];

/// When several organisms are named, the first rule here decides.
pub const BACTERIA_SUBTYPE_RULES: &[(&str, &str)] = &[
    (r"listeria\s+monocytogenes", "Listeria monocytogenes"),
    (r"listeria", "Listeria"),
    (
        r"(\be\.?\s*coli\b|escherichia\s+coli)\W*o157\W*h7",
        "E. coli O157:H7",
    ),
    (
        r"(\be\.?\s*coli\b|escherichia\s+coli)\W*o(26|45|103|111|121|145)\b",
        "E. coli non-O157 STEC",
    ),
    (r"\be\.?\s*coli\b|escherichia\s+coli", "E. coli"),
    (r"salmonella", "Salmonella"),
    (r"clostridium\s+botulinum|botulin", "Clostridium botulinum"),
    (r"clostridium\s+perfringens", "Clostridium perfringens"),
    (r"bacillus\s+cereus", "Bacillus cereus"),
    (r"cronobacter", "Cronobacter"),
    (r"staphylococc", "Staphylococcus aureus"),
    (r"shigella", "Shigella"),
    (r"campylobacter", "Campylobacter"),
    (r"vibrio", "Vibrio"),
    (r"yersinia", "Yersinia"),
];

/// Labels for the trailing segment of a `"Main - Secondary"` issue string.
pub const SECONDARY_ISSUE_RULES: &[(&str, &str)] = &[
    (r"medical\s+devices?", "Medical devices"),
    (r"allergen", "Undeclared allergen"),
    (r"extraneous|foreign", "Extraneous material"),
    (r"listeria", "Listeria"),
    (r"salmonella", "Salmonella"),
    (r"\be\.?\s*coli\b", "E. coli"),
    (r"chemical", "Chemical contamination"),
];

/// Ordered most severe first, so `"Class 1 - Class 2"` resolves to Class 1.
pub const CLASS_RULES: &[(&str, RecallClass)] = &[
    (r"class\s*(1|i)\b|type\s*i\b", RecallClass::Class1),
    (r"class\s*(2|ii)\b|type\s*ii\b", RecallClass::Class2),
    (r"class\s*(3|iii)\b|type\s*iii\b", RecallClass::Class3),
];

#[derive(Debug, Clone)]
pub struct Rule<L> {
    pattern: Regex,
    label: L,
}

impl<L> Rule<L> {
    pub fn new(pattern: &str, label: L) -> Result<Self, RecallError> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|err| RecallError::InvalidRule {
                pattern: pattern.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            pattern: compiled,
            label,
        })
    }

    pub fn label(&self) -> &L {
        &self.label
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Rules evaluated in insertion order; the first match wins.
#[derive(Debug, Clone)]
pub struct RuleList<L> {
    rules: Vec<Rule<L>>,
}

impl<L: Clone> RuleList<L> {
    pub fn from_table(table: &[(&str, L)]) -> Result<Self, RecallError> {
        let rules = table
            .iter()
            .map(|(pattern, label)| Rule::new(pattern, label.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn first_match(&self, text: &str) -> Option<&L> {
        self.rules
            .iter()
            .find(|rule| rule.is_match(text))
            .map(|rule| rule.label())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<L> FromIterator<Rule<L>> for RuleList<L> {
    fn from_iter<T: IntoIterator<Item = Rule<L>>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub category: RuleList<String>,
    pub main_issue: RuleList<String>,
    pub secondary_issue: RuleList<String>,
    pub bacteria_subtype: RuleList<String>,
    pub class: RuleList<RecallClass>,
    pub default_category: String,
}

impl RuleSet {
    pub fn builtin() -> Result<Self, RecallError> {
        Ok(Self {
            category: owned_table(CATEGORY_RULES)?,
            main_issue: owned_table(MAIN_ISSUE_RULES)?,
            secondary_issue: owned_table(SECONDARY_ISSUE_RULES)?,
            bacteria_subtype: owned_table(BACTERIA_SUBTYPE_RULES)?,
            class: RuleList::from_table(CLASS_RULES)?,
            default_category: DEFAULT_CATEGORY.to_string(),
        })
    }

    /// Built-in tables with any list present in `config` replaced wholesale.
    pub fn from_config(config: RulesConfig) -> Result<Self, RecallError> {
        let mut rules = Self::builtin()?;
        if let Some(entries) = config.category {
            rules.category = compile_entries(&entries)?;
        }
        if let Some(entries) = config.main_issue {
            rules.main_issue = compile_entries(&entries)?;
        }
        if let Some(entries) = config.secondary_issue {
            rules.secondary_issue = compile_entries(&entries)?;
        }
        if let Some(entries) = config.bacteria_subtype {
            rules.bacteria_subtype = compile_entries(&entries)?;
        }
        if let Some(entries) = config.class {
            rules.class = compile_entries(&entries)?;
        }
        if let Some(default_category) = config.default_category {
            if default_category.trim().is_empty() {
                return Err(RecallError::Config(
                    "default_category must not be empty".to_string(),
                ));
            }
            rules.default_category = default_category;
        }
        Ok(rules)
    }
}

fn owned_table(table: &[(&str, &str)]) -> Result<RuleList<String>, RecallError> {
    table
        .iter()
        .map(|(pattern, label)| Rule::new(pattern, (*label).to_string()))
        .collect()
}

fn compile_entries<L: Clone>(entries: &[RuleEntry<L>]) -> Result<RuleList<L>, RecallError> {
    entries
        .iter()
        .map(|entry| Rule::new(&entry.pattern, entry.label.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleSet,
}

impl Classifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn builtin() -> Result<Self, RecallError> {
        Ok(Self::new(RuleSet::builtin()?))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn classify_record(&self, record: &NormalizedRecall) -> Classification {
        self.classify(&record.title, &record.issue, &record.class_text)
    }

    pub fn classify(&self, title: &str, issue: &str, class_text: &str) -> Classification {
        if issue.trim().is_empty() {
            return Classification {
                category: self.rules.default_category.clone(),
                main_issue: None,
                secondary_issue: None,
                bacteria_subtype: None,
                class: RecallClass::LOWEST_SEVERITY,
            };
        }

        let text = format!("{title}\n{issue}");
        // The issue names the hazard; the title is only consulted when the
        // issue alone matches nothing.
        let issue_first = |rules: &RuleList<String>| {
            rules
                .first_match(issue)
                .or_else(|| rules.first_match(&text))
                .cloned()
        };
        let category = issue_first(&self.rules.category)
            .unwrap_or_else(|| self.rules.default_category.clone());
        let main_issue = issue_first(&self.rules.main_issue);
        let bacteria_subtype = self.rules.bacteria_subtype.first_match(&text).cloned();
        let secondary_issue = secondary_segment(issue).map(|segment| {
            self.rules
                .secondary_issue
                .first_match(segment)
                .cloned()
                .unwrap_or_else(|| segment.to_string())
        });
        let class = self
            .rules
            .class
            .first_match(class_text)
            .copied()
            .unwrap_or(RecallClass::LOWEST_SEVERITY);

        Classification {
            category,
            main_issue,
            secondary_issue,
            bacteria_subtype,
            class,
        }
    }
}

/// The segment of a `"Main - Secondary"` issue string that names a second
/// hazard. `"Listeria - Food"` carries none; for E. coli the second segment
/// is the strain and the third, if any, is the secondary hazard.
pub fn secondary_segment(issue: &str) -> Option<&str> {
    let parts = issue
        .split(" - ")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    let main = parts.first()?.to_lowercase();
    let candidate = if main.starts_with("e. coli") || main.starts_with("e.coli") {
        parts.get(2)
    } else if main == "listeria"
        && parts
            .get(1)
            .is_some_and(|part| part.eq_ignore_ascii_case("food"))
    {
        None
    } else {
        parts.get(1)
    }?;
    Some(*candidate)
}

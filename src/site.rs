use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A production facility. Orders are partitioned and scheduled per site.
///
/// Serializes as camelCase. Deserialization also takes the display labels
/// ingestion emits ("Piet Retief"), ignoring case, spaces and punctuation;
/// anything unrecognised reads as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Site {
    Boksburg,
    PietRetief,
    Ugie,
    Mkhondo,
    Unknown,
}

const ALL_SITES: [Site; 5] = [
    Site::Boksburg,
    Site::PietRetief,
    Site::Ugie,
    Site::Mkhondo,
    Site::Unknown,
];

fn fold(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl Site {
    pub fn from_label(name: &str) -> Site {
        let name = fold(name);
        ALL_SITES
            .into_iter()
            .find(|site| fold(site.label()) == name || fold(&format!("{:?}", site)) == name)
            .unwrap_or(Site::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Site::Boksburg => "Boksburg",
            Site::PietRetief => "Piet Retief",
            Site::Ugie => "Ugie",
            Site::Mkhondo => "Mkhondo",
            Site::Unknown => "Unknown Site",
        }
    }
}

impl<'de> Deserialize<'de> for Site {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Site::from_label(&name))
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of the site classification table.
///
/// Markers are matched case-insensitively as substrings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRule {
    pub site: Site,
    #[serde(default)]
    pub file_markers: Vec<String>,
    #[serde(default)]
    pub machine_markers: Vec<String>,
}

impl SiteRule {
    fn new(site: Site, file_markers: &[&str], machine_markers: &[&str]) -> Self {
        Self {
            site,
            file_markers: file_markers.iter().map(|m| m.to_string()).collect(),
            machine_markers: machine_markers.iter().map(|m| m.to_string()).collect(),
        }
    }
}

pub fn default_rules() -> Vec<SiteRule> {
    vec![
        SiteRule::new(Site::Boksburg, &["BXB", "BOKSBURG"], &["BXB"]),
        SiteRule::new(Site::PietRetief, &["PRF", "PIET"], &["PRF"]),
        SiteRule::new(Site::Ugie, &["UGI", "UGIE"], &["UGI"]),
        SiteRule::new(Site::Mkhondo, &["MKD", "MKHONDO"], &["MKD"]),
    ]
}

fn contains_any(haystack: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|m| !m.is_empty() && haystack.contains(&m.to_uppercase()))
}

/// Classifies an order by its upload filename first, then by its machine code.
///
/// The filename is checked against every rule before any machine code is
/// considered, so a `PRF` file containing a `BXB` machine is Piet Retief.
pub fn classify(rules: &[SiteRule], machine: &str, source_file: Option<&str>) -> Site {
    if let Some(file) = source_file {
        let file = file.to_uppercase();
        if let Some(rule) = rules.iter().find(|r| contains_any(&file, &r.file_markers)) {
            return rule.site;
        }
    }

    let machine = machine.to_uppercase();
    rules
        .iter()
        .find(|r| contains_any(&machine, &r.machine_markers))
        .map(|r| r.site)
        .unwrap_or(Site::Unknown)
}

use serde::{Deserialize, Serialize};

const FIELD_SEPARATOR: char = '_';

/// Campaign attribution carried by a `/start` code such as `yt_TH1_CL_01`.
///
/// Every field is free-form. An empty string means the value is unknown and
/// the record is left out of that dimension's breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub lead_type: String,
    #[serde(default)]
    pub creative: String,
}

impl Attribution {
    /// Parses `<platform>_<theme>_<lead_type>_<creative>` positionally.
    /// Missing trailing fields become empty; tokens past the fourth are
    /// ignored. No vocabulary checks happen here.
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        if code.is_empty() {
            return Self::default();
        }

        let mut parts = code.split(FIELD_SEPARATOR).map(str::to_string);
        Self {
            platform: parts.next().unwrap_or_default(),
            theme: parts.next().unwrap_or_default(),
            lead_type: parts.next().unwrap_or_default(),
            creative: parts.next().unwrap_or_default(),
        }
    }

    pub fn get(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Platform => &self.platform,
            Dimension::Theme => &self.theme,
            Dimension::LeadType => &self.lead_type,
            Dimension::Creative => &self.creative,
        }
    }

    /// `theme_leadtype_creative`, the key used both by the lead catalog and
    /// by the creative ranking. `None` unless all three parts are present.
    pub fn lead_key(&self) -> Option<String> {
        let theme = self.theme.trim();
        let lead_type = self.lead_type.trim();
        let creative = self.creative.trim();
        if theme.is_empty() || lead_type.is_empty() || creative.is_empty() {
            return None;
        }
        Some(format!("{theme}_{lead_type}_{creative}"))
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL
            .iter()
            .all(|dimension| self.get(*dimension).is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Platform,
    Theme,
    LeadType,
    Creative,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Platform,
        Dimension::Theme,
        Dimension::LeadType,
        Dimension::Creative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Theme => "theme",
            Self::LeadType => "lead_type",
            Self::Creative => "creative",
        }
    }
}

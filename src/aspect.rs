use std::fmt;

/// Coarse display-aspect bucket used to partition storage keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AspectCategory {
    Landscape,
    Portrait,
    Other,
}

impl AspectCategory {
    /// Map a probed ratio string to a category.
    ///
    /// Only the exact strings `16:9` and `9:16` are recognized. Ratios that
    /// are numerically equivalent (`32:18`, `1.78`) still land in `Other`.
    pub fn classify(ratio: &str) -> Self {
        match ratio {
            "16:9" => Self::Landscape,
            "9:16" => Self::Portrait,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AspectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

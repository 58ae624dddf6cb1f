//! Handling of the `autoboot.txt` configuration used by the tryboot scheme.
//!
//! The file has two sections: `[all]` names the partition the firmware uses
//! on a normal boot, `[tryboot]` names the partition it uses when the
//! one-shot tryboot flag is armed.

use thiserror::Error;

/// Marker enabling the firmware's tryboot A/B semantics.
pub const TRYBOOT_A_B_MARKER: &str = "tryboot_a_b=1";

/// Render an `autoboot.txt` with `all` as the normal boot partition and
/// `tryboot` as the partition of the reversible alternate boot path.
pub fn render_autoboot(all: &str, tryboot: &str) -> String {
    format!("[all]\n{TRYBOOT_A_B_MARKER}\nboot_partition={all}\n[tryboot]\nboot_partition={tryboot}\n")
}

/// Section of an `autoboot.txt` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AutobootSection {
    Unknown,
    All,
    Tryboot,
}

/// Boot partitions extracted from an `autoboot.txt` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Autoboot {
    /// Partition used on a normal boot.
    pub all: u32,
    /// Partition used when the tryboot flag is armed.
    pub tryboot: Option<u32>,
}

/// Error parsing an `autoboot.txt` file.
#[derive(Debug, Error)]
pub enum AutobootParseError {
    #[error("invalid boot partition in line {line:?}")]
    InvalidPartition { line: String },
    #[error("no boot partition in section `[all]`")]
    MissingAll,
}

/// Parse an `autoboot.txt` file.
pub fn parse_autoboot(text: &str) -> Result<Autoboot, AutobootParseError> {
    let mut section = AutobootSection::Unknown;
    let mut all = None;
    let mut tryboot = None;
    for line in text.lines() {
        if line.starts_with("[all]") {
            section = AutobootSection::All;
        } else if line.starts_with("[tryboot]") {
            section = AutobootSection::Tryboot;
        } else if line.starts_with('[') {
            section = AutobootSection::Unknown;
        } else if let Some(partition) = line.strip_prefix("boot_partition=") {
            let partition =
                partition
                    .trim()
                    .parse()
                    .map_err(|_| AutobootParseError::InvalidPartition {
                        line: line.to_owned(),
                    })?;
            match section {
                AutobootSection::All => all = Some(partition),
                AutobootSection::Tryboot => tryboot = Some(partition),
                AutobootSection::Unknown => {}
            }
        }
    }
    let Some(all) = all else {
        return Err(AutobootParseError::MissingAll);
    };
    Ok(Autoboot { all, tryboot })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_parse_round_trip() {
        let rendered = render_autoboot("3", "2");
        let parsed = parse_autoboot(&rendered).unwrap();
        assert_eq!(parsed.all, 3);
        assert_eq!(parsed.tryboot, Some(2));
    }

    #[test]
    fn test_parse_ignores_unknown_sections() {
        let parsed = parse_autoboot(
            "[gpio4=1]\nboot_partition=7\n[all]\ntryboot_a_b=1\nboot_partition=2\n",
        )
        .unwrap();
        assert_eq!(parsed.all, 2);
        assert_eq!(parsed.tryboot, None);
    }

    #[test]
    fn test_parse_requires_all_section() {
        assert!(matches!(
            parse_autoboot("[tryboot]\nboot_partition=3\n"),
            Err(AutobootParseError::MissingAll)
        ));
        assert!(matches!(
            parse_autoboot("[all]\nboot_partition=x\n"),
            Err(AutobootParseError::InvalidPartition { .. })
        ));
    }
}

//! Cross-version CartoCSS migration.
//!
//! [`migrate`] rewrites style text written for one renderer version so it
//! renders the same under another. Only a finite set of version pairs is
//! supported; anything else fails with
//! [`DomainError::NoMigrationPath`](crate::domain::error::DomainError).
//!
//! Pure text-in/text-out; no I/O and no shared state, safe to call
//! concurrently.

mod clip;
mod markers;
mod scan;

use crate::domain::error::DomainError;

use markers::MarkerTransform;

/// Lenient `major.minor.patch` renderer version; missing or malformed parts
/// read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

impl Version {
    fn parse(text: &str) -> Self {
        let mut parts = text.trim().split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self {
            major: next(),
            minor: next(),
            patch: next(),
        }
    }
}

/// Migrate CartoCSS text from one renderer version to another.
///
/// Identity when the versions are equal. Known paths:
///
/// * within the 2.0 line — `2.0.0` predates diameter-based marker sizing, so
///   migrating off it doubles `marker-width`/`marker-height`; later 2.0
///   patches pass through unchanged;
/// * `2.0.x` → `2.1.y` — the full marker transform (sizing, renames, and
///   geometry-conditioned override blocks); `2.1.1` targets additionally get
///   a whole-marker multi policy;
/// * `2.x` → `3.y` — explicit `<family>-clip: true` defaulting.
pub fn migrate(style: &str, from: &str, to: &str) -> Result<String, DomainError> {
    if from == to {
        return Ok(style.to_string());
    }

    let f = Version::parse(from);
    let t = Version::parse(to);

    if f.major == 2 && f.minor == 0 && f.patch <= 3 && t.major == 2 && t.minor == 0 && t.patch <= 3
    {
        if f.patch == 0 {
            let transform = MarkerTransform {
                double_sizes: true,
                multi_policy: false,
                synthesize_overrides: false,
            };
            return Ok(markers::apply(style, &transform));
        }
        return Ok(style.to_string());
    }

    if f.major == 2 && f.minor == 0 && f.patch <= 3 && t.major == 2 && t.minor == 1 && t.patch <= 1
    {
        let transform = MarkerTransform {
            // 2.0.1 is the one 2.0 release that already sizes markers as
            // diameters; every other 2.0 source doubles.
            double_sizes: f.patch != 1,
            multi_policy: t.patch >= 1,
            synthesize_overrides: true,
        };
        return Ok(markers::apply(style, &transform));
    }

    if f.major == 2 && t.major == 3 {
        return Ok(clip::apply(style));
    }

    Err(DomainError::no_migration_path(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_versions_match() {
        let style = "#t { marker-width:10; /* untouched */ }";
        assert_eq!(migrate(style, "2.0.0", "2.0.0").expect("identity"), style);
        assert_eq!(migrate(style, "bogus", "bogus").expect("identity"), style);
    }

    #[test]
    fn unknown_pairs_fail_with_no_migration_path() {
        let err = migrate("#t {}", "1.0.0", "2.1.0").expect_err("no path");
        assert_eq!(
            err,
            DomainError::no_migration_path("1.0.0", "2.1.0")
        );
        migrate("#t {}", "2.1.0", "2.0.0").expect_err("no backward path");
        migrate("#t {}", "3.0.0", "3.0.12").expect_err("no 3.x internal path");
    }

    #[test]
    fn from_2_0_2_doubles_sizes_and_adds_overrides() {
        let out = migrate("#t { marker-width:10; marker-height:20; }", "2.0.2", "2.1.0")
            .expect("migrated");
        assert!(out.contains("marker-width:20"), "{out}");
        assert!(out.contains("marker-height:40"), "{out}");
        assert!(out.contains("[\"mapnik::geometry_type\">1]"), "{out}");
    }

    #[test]
    fn from_2_0_1_sizes_are_already_doubled() {
        let out = migrate("#t { marker-width:10; }", "2.0.1", "2.1.0").expect("migrated");
        assert!(out.contains("marker-width:10"), "{out}");
        assert!(out.contains("[\"mapnik::geometry_type\"=1]"), "{out}");
    }

    #[test]
    fn target_2_1_1_appends_multi_policy() {
        let out = migrate("#t { marker-width:10; }", "2.0.0", "2.1.1").expect("migrated");
        assert!(out.contains("marker-multi-policy:whole"), "{out}");
    }

    #[test]
    fn target_2_1_0_omits_multi_policy() {
        let out = migrate("#t { marker-width:10; }", "2.0.0", "2.1.0").expect("migrated");
        assert!(!out.contains("marker-multi-policy"), "{out}");
    }

    #[test]
    fn within_2_0_line_doubles_only_from_2_0_0() {
        let doubled = migrate("#t { marker-width:10; }", "2.0.0", "2.0.2").expect("migrated");
        assert!(doubled.contains("marker-width:20"), "{doubled}");
        assert!(!doubled.contains("mapnik::geometry_type"), "{doubled}");

        let unchanged = migrate("#t { marker-width:10; }", "2.0.1", "2.0.2").expect("migrated");
        assert_eq!(unchanged, "#t { marker-width:10; }");
    }

    #[test]
    fn clip_path_applies_for_3_x_targets() {
        let out = migrate("#t { line-width: 2; }", "2.3.0", "3.0.12").expect("migrated");
        assert!(out.contains("line-clip: true;"), "{out}");
    }

    #[test]
    fn clip_path_is_idempotent() {
        let once = migrate("#t { line-width: 2; marker-fill: red; }", "2.3.0", "3.0.12")
            .expect("migrated");
        let twice = migrate(&once, "3.0.12", "3.0.12").expect("identity");
        assert_eq!(once, twice);
        // And pushing the output through the transform again changes nothing.
        assert_eq!(clip::apply(&once), once);
    }

    #[test]
    fn comments_are_stripped_before_rewriting() {
        let out = migrate(
            "/* note */ #t { marker-width:10; // inline\n }",
            "2.0.0",
            "2.1.0",
        )
        .expect("migrated");
        assert!(!out.contains("note"), "{out}");
        assert!(!out.contains("inline"), "{out}");
        assert!(out.contains("marker-width:20"), "{out}");
    }
}

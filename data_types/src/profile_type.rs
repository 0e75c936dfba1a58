//! Profile type selectors of the form `name:type:unit:period_type:period_unit`.

use std::fmt::Display;

/// Error returned for malformed profile type selectors.
#[derive(Debug, thiserror::Error)]
#[error("invalid profile type selector {0:?}: want name:type:unit:period_type:period_unit")]
pub struct ProfileTypeError(String);

/// A fully-qualified profile type, e.g.
/// `process_cpu:cpu:nanoseconds:cpu:nanoseconds`.
///
/// One series is produced per `(labels, profile type)` pair; the rendered
/// selector is stored as the `__profile_type__` label value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileType {
    pub name: String,
    pub sample_type: String,
    pub sample_unit: String,
    pub period_type: String,
    pub period_unit: String,
}

impl ProfileType {
    /// Parse a `name:type:unit:period_type:period_unit` selector.
    pub fn parse(s: &str) -> Result<Self, ProfileTypeError> {
        let parts: Vec<&str> = s.split(':').collect();
        let [name, sample_type, sample_unit, period_type, period_unit] = parts.as_slice() else {
            return Err(ProfileTypeError(s.to_string()));
        };
        if sample_type.is_empty() || sample_unit.is_empty() {
            return Err(ProfileTypeError(s.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            sample_type: sample_type.to_string(),
            sample_unit: sample_unit.to_string(),
            period_type: period_type.to_string(),
            period_unit: period_unit.to_string(),
        })
    }
}

impl Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.name, self.sample_type, self.sample_unit, self.period_type, self.period_unit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let pt = ProfileType::parse("process_cpu:cpu:nanoseconds:cpu:nanoseconds").unwrap();
        assert_eq!(pt.name, "process_cpu");
        assert_eq!(pt.sample_type, "cpu");
        assert_eq!(pt.to_string(), "process_cpu:cpu:nanoseconds:cpu:nanoseconds");
    }

    #[test]
    fn parse_allows_empty_name() {
        // Profiles pushed without a metric-name label produce selectors with
        // an empty name component.
        let pt = ProfileType::parse(":alloc_objects:count:space:bytes").unwrap();
        assert_eq!(pt.name, "");
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert!(ProfileType::parse("cpu:nanoseconds").is_err());
        assert!(ProfileType::parse("a:b:c:d:e:f").is_err());
        assert!(ProfileType::parse("a::c:d:e").is_err());
    }
}

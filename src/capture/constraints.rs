//! Capture constraint profiles and per-device-class fallback ladders.
//!
//! Some platforms reject a capture request that is too specific but
//! accept a relaxed one. Instead of branching on the platform in code,
//! each device class maps to an ordered list of profiles, richest first.
//! The acquirer walks the list until a request succeeds.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Coarse platform category used to select a fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Android,
    Ios,
    #[default]
    Unknown,
}

/// A device class name that is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device class: {0}")]
pub struct UnknownDeviceClass(pub String);

impl std::str::FromStr for DeviceClass {
    type Err = UnknownDeviceClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(DeviceClass::Desktop),
            "android" => Ok(DeviceClass::Android),
            "ios" => Ok(DeviceClass::Ios),
            "unknown" => Ok(DeviceClass::Unknown),
            other => Err(UnknownDeviceClass(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Android => "android",
            DeviceClass::Ios => "ios",
            DeviceClass::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Which physical camera a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the user.
    User,
    /// Rear camera, facing the scene.
    Environment,
}

/// Requested bounds for one capture dimension, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub ideal: Option<u32>,
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl Bounds {
    pub fn ideal(value: u32) -> Self {
        Self {
            ideal: Some(value),
            ..Default::default()
        }
    }

    /// Returns true when no bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.ideal.is_none() && self.min.is_none() && self.max.is_none()
    }
}

/// A named capture request descriptor.
///
/// A profile with no facing mode and no resolution bounds is the most
/// permissive request possible ("any video").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProfile {
    pub name: String,
    #[serde(default)]
    pub facing_mode: Option<FacingMode>,
    #[serde(default)]
    pub width: Option<Bounds>,
    #[serde(default)]
    pub height: Option<Bounds>,
}

impl ConstraintProfile {
    /// Creates a profile that accepts any video source.
    pub fn permissive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            facing_mode: None,
            width: None,
            height: None,
        }
    }

    pub fn with_facing(mut self, facing_mode: FacingMode) -> Self {
        self.facing_mode = Some(facing_mode);
        self
    }

    /// Requests an ideal resolution without hard bounds.
    pub fn with_ideal_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(Bounds::ideal(width));
        self.height = Some(Bounds::ideal(height));
        self
    }

    /// Returns true if the profile places no constraint on the stream.
    pub fn is_permissive(&self) -> bool {
        self.facing_mode.is_none()
            && self.width.map_or(true, |b| b.is_unbounded())
            && self.height.map_or(true, |b| b.is_unbounded())
    }

    /// Returns the ideal resolution if both dimensions request one.
    pub fn ideal_resolution(&self) -> Option<(u32, u32)> {
        let width = self.width.and_then(|b| b.ideal.or(b.max).or(b.min))?;
        let height = self.height.and_then(|b| b.ideal.or(b.max).or(b.min))?;
        Some((width, height))
    }
}

/// Ideal resolution of the richest built-in profile.
pub const PREFERRED_WIDTH: u32 = 1280;
pub const PREFERRED_HEIGHT: u32 = 720;

/// Returns the built-in ladder for a device class, richest profile first.
pub fn builtin_ladder(class: DeviceClass) -> Vec<ConstraintProfile> {
    let rear_hd = ConstraintProfile::permissive("rear-hd")
        .with_facing(FacingMode::Environment)
        .with_ideal_resolution(PREFERRED_WIDTH, PREFERRED_HEIGHT);
    let any = ConstraintProfile::permissive("any-video");

    match class {
        // Mobile browsers are the ones that reject specific constraints,
        // so they get an intermediate step that keeps the rear camera.
        DeviceClass::Android | DeviceClass::Ios => vec![
            rear_hd,
            ConstraintProfile::permissive("rear-any").with_facing(FacingMode::Environment),
            any,
        ],
        // Desktops usually expose a single webcam with no facing information.
        DeviceClass::Desktop => vec![
            ConstraintProfile::permissive("hd")
                .with_ideal_resolution(PREFERRED_WIDTH, PREFERRED_HEIGHT),
            any,
        ],
        DeviceClass::Unknown => vec![rear_hd, any],
    }
}

/// Ladder lookup: configured overrides first, built-in ladders otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    overrides: HashMap<String, Vec<ConstraintProfile>>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the ladder for one device class.
    pub fn with_ladder(mut self, class: DeviceClass, ladder: Vec<ConstraintProfile>) -> Self {
        self.overrides.insert(class.to_string(), ladder);
        self
    }

    /// Returns the ordered ladder to try for `class`.
    pub fn ladder(&self, class: DeviceClass) -> Vec<ConstraintProfile> {
        match self.overrides.get(&class.to_string()) {
            Some(ladder) => ladder.clone(),
            None => builtin_ladder(class),
        }
    }

    /// Returns the key of the first override that is empty or names no
    /// known device class.
    pub fn first_invalid(&self) -> Option<&str> {
        self.overrides
            .iter()
            .find(|(key, ladder)| ladder.is_empty() || key.parse::<DeviceClass>().is_err())
            .map(|(key, _)| key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class_parsing() {
        assert_eq!("iOS".parse::<DeviceClass>(), Ok(DeviceClass::Ios));
        assert_eq!("desktop".parse::<DeviceClass>(), Ok(DeviceClass::Desktop));

        let err = "toaster".parse::<DeviceClass>().unwrap_err();
        assert_eq!(err, UnknownDeviceClass("toaster".to_string()));
        assert_eq!(err.to_string(), "unknown device class: toaster");
    }

    #[test]
    fn test_builtin_ladders_end_permissive() {
        for class in [
            DeviceClass::Desktop,
            DeviceClass::Android,
            DeviceClass::Ios,
            DeviceClass::Unknown,
        ] {
            let ladder = builtin_ladder(class);
            assert!(ladder.len() >= 2, "{class} ladder too short");
            assert!(!ladder[0].is_permissive());
            assert!(ladder.last().unwrap().is_permissive());
        }
    }

    #[test]
    fn test_richest_profile_requests_rear_hd() {
        let ladder = builtin_ladder(DeviceClass::Android);
        assert_eq!(ladder[0].facing_mode, Some(FacingMode::Environment));
        assert_eq!(ladder[0].ideal_resolution(), Some((1280, 720)));
    }

    #[test]
    fn test_override_replaces_builtin() {
        let table = ProfileTable::new().with_ladder(
            DeviceClass::Ios,
            vec![ConstraintProfile::permissive("only")],
        );

        assert_eq!(table.ladder(DeviceClass::Ios).len(), 1);
        assert_eq!(table.ladder(DeviceClass::Android), builtin_ladder(DeviceClass::Android));
        assert_eq!(table.first_invalid(), None);
    }

    #[test]
    fn test_empty_or_unknown_override_is_invalid() {
        let table = ProfileTable::new().with_ladder(DeviceClass::Desktop, vec![]);
        assert_eq!(table.first_invalid(), Some("desktop"));

        #[derive(Deserialize)]
        struct Wrapper {
            profiles: ProfileTable,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [[profiles.toaster]]
            name = "any"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.profiles.first_invalid(), Some("toaster"));
    }

    #[test]
    fn test_profiles_parse_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            profiles: ProfileTable,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            [[profiles.android]]
            name = "rear-fhd"
            facing_mode = "environment"
            width = { ideal = 1920 }
            height = { ideal = 1080 }

            [[profiles.android]]
            name = "any"
            "#,
        )
        .unwrap();

        let ladder = parsed.profiles.ladder(DeviceClass::Android);
        assert_eq!(ladder.len(), 2);
        assert_eq!(ladder[0].ideal_resolution(), Some((1920, 1080)));
        assert!(ladder[1].is_permissive());
    }
}

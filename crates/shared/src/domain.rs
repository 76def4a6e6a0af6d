use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(GalleryId);
id_newtype!(ImageId);

/// Server-issued identifier of an archive export job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hover preview style configured per gallery (`hover_animation` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationStyle {
    #[default]
    Crossfade,
    Flip,
    Glitch,
}

impl AnimationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            AnimationStyle::Crossfade => "crossfade",
            AnimationStyle::Flip => "flip",
            AnimationStyle::Glitch => "glitch",
        }
    }
}

impl fmt::Display for AnimationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnimationStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "crossfade" => Ok(AnimationStyle::Crossfade),
            "flip" => Ok(AnimationStyle::Flip),
            "glitch" => Ok(AnimationStyle::Glitch),
            other => Err(format!("unknown animation style '{other}'")),
        }
    }
}

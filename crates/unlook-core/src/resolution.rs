//! Image resolution.
//!
//! A [`Resolution`] is written as a `[width, height]` pair on the wire and in
//! the configuration document. Readers also accept the keyed form
//! `{"width": w, "height": h}`. Both dimensions must be positive.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Width/height pair in pixels. Both dimensions are always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// 1280x720, the default sensor mode.
    pub const HD: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    /// Creates a resolution, returning `None` if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the resolution as a `(width, height)` tuple.
    pub fn as_tuple(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels in one frame.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl TryFrom<(u32, u32)> for Resolution {
    type Error = InvalidResolution;

    fn try_from((width, height): (u32, u32)) -> Result<Self, Self::Error> {
        Self::new(width, height).ok_or(InvalidResolution { width, height })
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(resolution: Resolution) -> Self {
        resolution.as_tuple()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A resolution with a zero dimension was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid resolution {width}x{height}: dimensions must be positive")]
pub struct InvalidResolution {
    pub width: u32,
    pub height: u32,
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_tuple().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResolutionVisitor;

        impl<'de> de::Visitor<'de> for ResolutionVisitor {
            type Value = Resolution;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [width, height] pair or a {width, height} map")
            }

            fn visit_seq<S: de::SeqAccess<'de>>(self, mut seq: S) -> Result<Resolution, S::Error> {
                let width: u32 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let height: u32 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Resolution::try_from((width, height)).map_err(de::Error::custom)
            }

            fn visit_map<M: de::MapAccess<'de>>(self, mut map: M) -> Result<Resolution, M::Error> {
                let mut width = None;
                let mut height = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "width" => width = Some(map.next_value::<u32>()?),
                        "height" => height = Some(map.next_value::<u32>()?),
                        _ => {
                            map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }
                let width = width.ok_or_else(|| de::Error::missing_field("width"))?;
                let height = height.ok_or_else(|| de::Error::missing_field("height"))?;
                Resolution::try_from((width, height)).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(ResolutionVisitor)
    }
}

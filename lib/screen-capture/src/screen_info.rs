use crate::DisplayService;

/// Geometry used when the display service cannot be queried.
pub const FALLBACK_GEOMETRY: DisplayGeometry = DisplayGeometry {
    width: 1080,
    height: 1920,
    density_dpi: 320,
    rotation: Rotation::_0,
};

#[derive(thiserror::Error, Debug, Clone)]
pub enum DisplayServiceError {
    #[error("Display service unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid display geometry: {0}")]
    InvalidGeometry(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    _0,
    _90,
    _180,
    _270,
}

impl Rotation {
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::_0 => 0,
            Rotation::_90 => 90,
            Rotation::_180 => 180,
            Rotation::_270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = DisplayServiceError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::_0),
            90 => Ok(Rotation::_90),
            180 => Ok(Rotation::_180),
            270 => Ok(Rotation::_270),
            v => Err(DisplayServiceError::InvalidGeometry(format!(
                "unsupported rotation {v}"
            ))),
        }
    }
}

/// Snapshot of the real display, read once when a pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    /// Logical width in pixels
    pub width: u32,

    /// Logical height in pixels
    pub height: u32,

    pub density_dpi: u32,
    pub rotation: Rotation,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        FALLBACK_GEOMETRY
    }
}

impl DisplayGeometry {
    pub fn new(width: u32, height: u32, density_dpi: u32, rotation: Rotation) -> Self {
        Self {
            width,
            height,
            density_dpi,
            rotation,
        }
    }

    pub fn validate(&self) -> Result<(), DisplayServiceError> {
        if self.width == 0 || self.height == 0 || self.density_dpi == 0 {
            return Err(DisplayServiceError::InvalidGeometry(format!(
                "{}x{} @ {}dpi",
                self.width, self.height, self.density_dpi
            )));
        }

        Ok(())
    }
}

/// Query the display service, degrading to [`FALLBACK_GEOMETRY`] on any failure.
pub fn display_geometry(service: &dyn DisplayService) -> DisplayGeometry {
    match service
        .geometry()
        .and_then(|geometry| geometry.validate().map(|_| geometry))
    {
        Ok(geometry) => {
            log::info!(
                "display geometry: {}x{} @ {}dpi, rotation {}",
                geometry.width,
                geometry.height,
                geometry.density_dpi,
                geometry.rotation.degrees()
            );
            geometry
        }
        Err(e) => {
            log::warn!("query display geometry failed: {e}. fallback to {FALLBACK_GEOMETRY:?}");
            FALLBACK_GEOMETRY
        }
    }
}

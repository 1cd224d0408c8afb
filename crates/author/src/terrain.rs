/// Ground height source for blade placement.
pub trait Terrain {
    /// Height at world `(x, z)`, or `None` where no grass may grow.
    fn height_at(&self, x: f32, z: f32) -> Option<f32>;
}

/// Level ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatTerrain {
    pub height: f32,
}

impl Terrain for FlatTerrain {
    fn height_at(&self, _x: f32, _z: f32) -> Option<f32> {
        Some(self.height)
    }
}

/// Rolling hills from two crossed sine waves, with water below `water_level`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveTerrain {
    pub base: f32,
    pub amplitude: f32,
    pub wavelength: f32,
    /// Heights below this are bare. `None` grows grass everywhere.
    pub water_level: Option<f32>,
}

impl Default for WaveTerrain {
    fn default() -> Self {
        Self {
            base: 0.0,
            amplitude: 4.0,
            wavelength: 96.0,
            water_level: None,
        }
    }
}

impl Terrain for WaveTerrain {
    fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let k = std::f32::consts::TAU / self.wavelength;
        let h = self.base + self.amplitude * 0.5 * ((x * k).sin() + (z * k).cos());
        match self.water_level {
            Some(level) if h < level => None,
            _ => Some(h),
        }
    }
}

use crate::error::{PlayerError, PlayerResult};

pub const MAX_VOLUME: u8 = 100;

/// Volumen base más el volumen reducido ("ducking") mientras alguien habla.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeController {
    base: u8,
    duck_target: u8,
    ducking: bool,
}

impl VolumeController {
    pub fn new(base: u8, duck_target: u8) -> Self {
        Self {
            base: base.min(MAX_VOLUME),
            duck_target: duck_target.min(MAX_VOLUME),
            ducking: false,
        }
    }

    /// Volumen de salida: el objetivo de ducking mientras está activo, si no el base.
    pub fn effective_volume(&self) -> u8 {
        if self.ducking {
            self.duck_target
        } else {
            self.base
        }
    }

    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn duck_target(&self) -> u8 {
        self.duck_target
    }

    pub fn is_ducking(&self) -> bool {
        self.ducking
    }

    /// Valida y aplica un nuevo volumen base (0-100).
    pub fn set_base(&mut self, percent: i64) -> PlayerResult<()> {
        self.base = validate_percent(percent)?;
        Ok(())
    }

    pub fn set_duck_target(&mut self, percent: u8) {
        self.duck_target = percent.min(MAX_VOLUME);
    }

    /// Cambia el estado de ducking. Devuelve `true` si el volumen efectivo cambió de fuente.
    pub fn set_ducking(&mut self, active: bool) -> bool {
        let changed = self.ducking != active;
        self.ducking = active;
        changed
    }
}

pub fn validate_percent(percent: i64) -> PlayerResult<u8> {
    u8::try_from(percent)
        .ok()
        .filter(|value| *value <= MAX_VOLUME)
        .ok_or_else(|| {
            PlayerError::InvalidArgument(format!(
                "El volumen debe estar entre 0 y {MAX_VOLUME}, recibido: {percent}"
            ))
        })
}

/// Interpolación lineal entre dos niveles de volumen en pasos discretos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRamp {
    from: u8,
    to: u8,
    steps: u32,
    done: u32,
}

impl VolumeRamp {
    pub fn new(from: u8, to: u8, steps: u32) -> Self {
        Self {
            from,
            to,
            steps: steps.max(1),
            done: 0,
        }
    }

    pub fn target(&self) -> u8 {
        self.to
    }

    pub fn is_finished(&self) -> bool {
        self.done >= self.steps
    }
}

impl Iterator for VolumeRamp {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.is_finished() {
            return None;
        }
        self.done += 1;

        let from = f32::from(self.from);
        let to = f32::from(self.to);
        let level = from + (to - from) * (self.done as f32 / self.steps as f32);
        Some(level.round().clamp(0.0, f32::from(MAX_VOLUME)) as u8)
    }
}

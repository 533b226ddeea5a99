//! Synthetic eye images for tests.

#[derive(Debug, Clone, Copy)]
struct Blob {
    cx: f64,
    cy: f64,
    a: f64,
    b: f64,
    /// Major axis angle in the `Pupil` convention (degrees, counter-clockwise on screen).
    angle_deg: f64,
}

impl Blob {
    fn contains(&self, x: f64, y: f64) -> bool {
        // Image y points down, so a counter-clockwise screen angle is a
        // negative rotation in pixel coordinates.
        let theta = -self.angle_deg.to_radians();
        let (dx, dy) = (x - self.cx, y - self.cy);
        let u = dx * theta.cos() + dy * theta.sin();
        let v = -dx * theta.sin() + dy * theta.cos();
        (u / self.a).powi(2) + (v / self.b).powi(2) <= 1.0
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EyeScene {
    width: usize,
    height: usize,
    pupils: Vec<Blob>,
    glints: Vec<(usize, usize, usize)>,
    pupil_level: u8,
    background_level: u8,
    noise: u8,
}

impl EyeScene {
    pub(crate) fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pupils: Vec::new(),
            glints: Vec::new(),
            pupil_level: 30,
            background_level: 180,
            noise: 0,
        }
    }

    /// Add the pupil: center, semi-axes and angle in degrees.
    pub(crate) fn with_pupil(mut self, cx: f64, cy: f64, a: f64, b: f64, angle_deg: f64) -> Self {
        self.pupils.insert(
            0,
            Blob {
                cx,
                cy,
                a,
                b,
                angle_deg,
            },
        );
        self
    }

    pub(crate) fn with_extra_pupil(mut self, cx: f64, cy: f64, a: f64, b: f64) -> Self {
        self.pupils.push(Blob {
            cx,
            cy,
            a,
            b,
            angle_deg: 0.0,
        });
        self
    }

    /// Bright square of side `size` with top-left corner `(x, y)`.
    pub(crate) fn with_glint(mut self, x: usize, y: usize, size: usize) -> Self {
        self.glints.push((x, y, size));
        self
    }

    pub(crate) fn with_levels(mut self, pupil: u8, background: u8) -> Self {
        self.pupil_level = pupil;
        self.background_level = background;
        self
    }

    /// Deterministic per-pixel noise in `[-amplitude, amplitude]`.
    pub(crate) fn with_noise(mut self, amplitude: u8) -> Self {
        self.noise = amplitude;
        self
    }
}

/// Render `scene` into a row-major 8-bit buffer.
pub(crate) fn render_ellipse(scene: &EyeScene) -> Vec<u8> {
    let mut data = vec![scene.background_level; scene.width * scene.height];
    let mut rng = 0x2545_f491_4f6c_dd1du64;
    for y in 0..scene.height {
        for x in 0..scene.width {
            let i = y * scene.width + x;
            if scene.pupils.iter().any(|p| p.contains(x as f64, y as f64)) {
                data[i] = scene.pupil_level;
            }
            if scene
                .glints
                .iter()
                .any(|&(gx, gy, s)| x >= gx && x < gx + s && y >= gy && y < gy + s)
            {
                data[i] = 255;
            }
            if scene.noise > 0 {
                rng ^= rng << 13;
                rng ^= rng >> 7;
                rng ^= rng << 17;
                let span = 2 * scene.noise as u64 + 1;
                let offset = (rng % span) as i16 - scene.noise as i16;
                data[i] = (data[i] as i16 + offset).clamp(0, 255) as u8;
            }
        }
    }
    data
}

pub(crate) fn uniform_frame(width: usize, height: usize, value: u8) -> Vec<u8> {
    vec![value; width * height]
}

/// Full-range pseudo-random pixels without any pupil-like structure.
pub(crate) fn noise_frame(width: usize, height: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..width * height)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect()
}

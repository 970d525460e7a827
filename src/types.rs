use fixed::types::I32F32;

/// A length in PDF points. Every value sits on the millipoint grid, so two
/// lengths computed along different routes compare equal whenever they
/// print the same, and geometry written into output files is reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pt(I32F32);

const MILLI_PER_PT: i64 = 1000;

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::ZERO);

    fn on_grid(value: I32F32) -> Pt {
        let milli = value.saturating_mul_int(MILLI_PER_PT).saturating_round();
        Pt(milli.saturating_div_int(MILLI_PER_PT))
    }

    pub fn from_f32(value: f32) -> Pt {
        if value.is_finite() {
            Pt::on_grid(I32F32::saturating_from_num(value))
        } else {
            Pt::ZERO
        }
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn max(self, other: Pt) -> Pt {
        Pt(self.0.max(other.0))
    }

    pub fn min(self, other: Pt) -> Pt {
        Pt(self.0.min(other.0))
    }

    pub fn abs(self) -> Pt {
        Pt(self.0.saturating_abs())
    }

    /// Number as written into content streams and page boxes: at most three
    /// decimals, no trailing zeros.
    pub fn pdf_number(self) -> String {
        pdf_number(self.to_f32())
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::on_grid(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::on_grid(self.0.saturating_sub(rhs.0))
    }
}

/// Scaling by a non-finite factor gives zero.
impl std::ops::Mul<f32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: f32) -> Pt {
        Pt::from_f32(self.to_f32() * rhs)
    }
}

/// Division by zero gives zero.
impl std::ops::Div<f32> for Pt {
    type Output = Pt;
    fn div(self, rhs: f32) -> Pt {
        if rhs == 0.0 {
            Pt::ZERO
        } else {
            Pt::from_f32(self.to_f32() / rhs)
        }
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt::on_grid(self.0.saturating_neg())
    }
}

pub fn pdf_number(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let mut out = format!("{:.3}", value);
    while out.contains('.') && (out.ends_with('0') || out.ends_with('.')) {
        out.pop();
    }
    if out == "-0" {
        out = "0".to_string();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: Pt::from_f32(width),
            height: Pt::from_f32(height),
        }
    }

    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self {
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Component-wise maximum, used to size a page that must hold every layer.
    pub fn union(self, other: Size) -> Self {
        Self {
            width: self.width.max(other.width),
            height: self.height.max(other.height),
        }
    }

    pub fn area(self) -> f32 {
        self.width.to_f32() * self.height.to_f32()
    }
}

/// A page box in PDF user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn from_size(size: Size) -> Self {
        Self {
            x: Pt::ZERO,
            y: Pt::ZERO,
            width: size.width,
            height: size.height,
        }
    }

    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: Pt::from_f32(x0.min(x1)),
            y: Pt::from_f32(y0.min(y1)),
            width: Pt::from_f32((x1 - x0).abs()),
            height: Pt::from_f32((y1 - y0).abs()),
        }
    }

    pub fn size(self) -> Size {
        Size {
            width: self.width,
            height: self.height,
        }
    }

    pub fn right(self) -> Pt {
        self.x + self.width
    }

    pub fn top(self) -> Pt {
        self.y + self.height
    }

    /// A rectangle of `inner` size centred on this one.
    pub fn centered(self, inner: Size) -> Rect {
        let dx = (self.width - inner.width) / 2.0;
        let dy = (self.height - inner.height) / 2.0;
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            width: inner.width,
            height: inner.height,
        }
    }
}

/// Colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    /// Plotter default; a layer with this colour is never recoloured.
    pub const BLACK: Rgb = Rgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` (the leading `#` is optional). Shorthand `#rgb`
    /// repeats each nibble.
    pub fn from_hex(text: &str) -> Option<Rgb> {
        let hex = text.trim().trim_start_matches('#');
        let channels: Vec<u8> = match hex.len() {
            6 => (0..3)
                .map(|i| u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok())
                .collect::<Option<Vec<u8>>>()?,
            3 => (0..3)
                .map(|i| {
                    let v = u8::from_str_radix(hex.get(i..i + 1)?, 16).ok()?;
                    Some(v * 17)
                })
                .collect::<Option<Vec<u8>>>()?,
            _ => return None,
        };
        Some(Rgb::from_u8(channels[0], channels[1], channels[2]))
    }

    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }

    pub fn to_u8(self) -> (u8, u8, u8) {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        (c(self.r), c(self.g), c(self.b))
    }

    pub fn to_hex(self) -> String {
        let (r, g, b) = self.to_u8();
        format!("#{:02X}{:02X}{:02X}", r, g, b)
    }

    pub fn is_black(self) -> bool {
        self.to_u8() == (0, 0, 0)
    }

    pub fn components(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

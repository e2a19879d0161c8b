//! Draws element numbers onto screenshots for the oracle.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;

use crate::error::AnnotateError;
use crate::types::ElementSet;

/// Renders a labeled copy of a screenshot.
pub trait Annotator: Send + Sync {
    fn annotate(
        &self,
        screenshot: &Path,
        output: &Path,
        elements: &ElementSet,
    ) -> Result<(), AnnotateError>;
}

/// 3x5 digit glyphs, one row per byte, most significant of 3 bits on the left.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b001, 0b001, 0b001],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

const SCALE: i32 = 6;
const PAD: i32 = 10;
const OFFSET: i32 = 10;

/// Number badges placed just below-right of each element's center.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelAnnotator {
    dark_mode: bool,
}

impl LabelAnnotator {
    pub fn new(dark_mode: bool) -> Self {
        Self { dark_mode }
    }

    fn colors(&self) -> (Rgba<u8>, Rgba<u8>) {
        let light = Rgba([255, 250, 250, 255]);
        let dark = Rgba([10, 10, 10, 255]);
        if self.dark_mode { (dark, light) } else { (light, dark) }
    }

    fn draw_label(&self, img: &mut RgbaImage, label: &str, x: i32, y: i32) {
        let (text, background) = self.colors();
        let glyph_w = 3 * SCALE;
        let glyph_h = 5 * SCALE;
        let digits: Vec<usize> = label
            .chars()
            .filter_map(|c| c.to_digit(10))
            .map(|d| d as usize)
            .collect();
        if digits.is_empty() {
            return;
        }
        let width = digits.len() as i32 * (glyph_w + SCALE) - SCALE + 2 * PAD;
        let height = glyph_h + 2 * PAD;

        draw_filled_rect_mut(img, rect(x, y, width, height), background);
        for (i, digit) in digits.iter().enumerate() {
            let gx = x + PAD + i as i32 * (glyph_w + SCALE);
            for (row, bits) in DIGITS[*digit].iter().enumerate() {
                for col in 0..3 {
                    if bits & (0b100 >> col) != 0 {
                        let cell = rect(
                            gx + col * SCALE,
                            y + PAD + row as i32 * SCALE,
                            SCALE,
                            SCALE,
                        );
                        draw_filled_rect_mut(img, cell, text);
                    }
                }
            }
        }
    }
}

impl Annotator for LabelAnnotator {
    fn annotate(
        &self,
        screenshot: &Path,
        output: &Path,
        elements: &ElementSet,
    ) -> Result<(), AnnotateError> {
        let mut img = image::open(screenshot)
            .map_err(|source| AnnotateError::Load {
                path: screenshot.to_path_buf(),
                source,
            })?
            .to_rgba8();

        for (number, elem) in elements.numbered() {
            let center = elem.center();
            self.draw_label(
                &mut img,
                &number.to_string(),
                center.x + OFFSET,
                center.y + OFFSET,
            );
        }

        img.save(output).map_err(|source| AnnotateError::Save {
            path: output.to_path_buf(),
            source,
        })
    }
}

/// Drawing clips to the canvas, so badges may hang off the edge.
fn rect(x: i32, y: i32, w: i32, h: i32) -> Rect {
    Rect::at(x, y).of_size(w.unsigned_abs(), h.unsigned_abs())
}

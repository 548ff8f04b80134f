//! Text-layer extraction from page content streams.
//!
//! Interprets the text-showing subset of the content-stream operators and
//! groups glyphs into whitespace-delimited words. Glyph advances use an
//! average width since font metrics are not loaded; boxes are exact in the
//! vertical direction and approximate horizontally.

use crate::{MediaBox, PdfEngineError};
use lopdf::content::Content;
use lopdf::Object;

/// Average glyph advance as a fraction of the font size.
const GLYPH_ADVANCE_EM: f32 = 0.556;
/// Glyph extent below and above the baseline as fractions of the font size.
const DESCENT_EM: f32 = 0.2;
const ASCENT_EM: f32 = 0.8;
/// `TJ` adjustments wider than this (thousandths of an em) separate words.
const WORD_GAP_THOUSANDTHS: f32 = 250.0;

/// One word of embedded text.
///
/// Coordinates are points from the top-left corner of the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Accumulates glyphs into whitespace-delimited words.
#[derive(Debug, Default)]
pub(crate) struct SpanBuilder {
    spans: Vec<TextSpan>,
    word: String,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl SpanBuilder {
    /// Adds a glyph with top-left-origin bounds.
    pub(crate) fn push(&mut self, c: char, left: f32, top: f32, right: f32, bottom: f32) {
        if self.word.is_empty() {
            self.left = left;
            self.top = top;
            self.right = right;
            self.bottom = bottom;
        } else {
            self.left = self.left.min(left);
            self.top = self.top.min(top);
            self.right = self.right.max(right);
            self.bottom = self.bottom.max(bottom);
        }
        self.word.push(c);
    }

    pub(crate) fn flush(&mut self) {
        if self.word.is_empty() {
            return;
        }
        self.spans.push(TextSpan {
            text: std::mem::take(&mut self.word),
            x: self.left,
            y: self.top,
            width: (self.right - self.left).max(0.0),
            height: (self.bottom - self.top).max(0.0),
        });
    }

    pub(crate) fn finish(mut self) -> Vec<TextSpan> {
        self.flush();
        self.spans
    }
}

/// Affine matrix `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × rhs`: applies `self` first, then `rhs`.
    fn then(self, rhs: Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [ra, rb, rc, rd, re, rf] = rhs.0;
        Matrix([
            a * ra + b * rc,
            a * rb + b * rd,
            c * ra + d * rc,
            c * rb + d * rd,
            e * ra + f * rc + re,
            e * rb + f * rd + rf,
        ])
    }

    fn apply(self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (x * a + y * c + e, x * b + y * d + f)
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

struct Interpreter<'a> {
    media_box: &'a MediaBox,
    ctm: Matrix,
    saved: Vec<(Matrix, TextState)>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    state: TextState,
    builder: SpanBuilder,
}

impl<'a> Interpreter<'a> {
    fn new(media_box: &'a MediaBox) -> Self {
        Self {
            media_box,
            ctm: Matrix::IDENTITY,
            saved: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            state: TextState::default(),
            builder: SpanBuilder::default(),
        }
    }

    fn operate(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "q" => self.saved.push((self.ctm, self.state)),
            "Q" => {
                if let Some((ctm, state)) = self.saved.pop() {
                    self.ctm = ctm;
                    self.state = state;
                }
            }
            "cm" => {
                if let Some(m) = matrix(operands) {
                    self.ctm = m.then(self.ctm);
                }
            }
            "BT" => {
                self.builder.flush();
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "ET" => self.builder.flush(),
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.state.font_size = size;
                }
            }
            "Tc" => self.set(operands, |state, v| state.char_spacing = v),
            "Tw" => self.set(operands, |state, v| state.word_spacing = v),
            "Tz" => self.set(operands, |state, v| state.horizontal_scale = v / 100.0),
            "TL" => self.set(operands, |state, v| state.leading = v),
            "Ts" => self.set(operands, |state, v| state.rise = v),
            "Td" => {
                if let (Some(tx), Some(ty)) = (nth(operands, 0), nth(operands, 1)) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (nth(operands, 0), nth(operands, 1)) {
                    self.state.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = matrix(operands) {
                    self.builder.flush();
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    self.show(bytes);
                }
            }
            "'" => {
                self.next_line();
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    self.show(bytes);
                }
            }
            "\"" => {
                if let (Some(aw), Some(ac)) = (nth(operands, 0), nth(operands, 1)) {
                    self.state.word_spacing = aw;
                    self.state.char_spacing = ac;
                }
                self.next_line();
                if let Some(bytes) = operands.get(2).and_then(string_bytes) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                let Some(Object::Array(items)) = operands.first() else {
                    return;
                };
                for item in items {
                    if let Some(bytes) = string_bytes(item) {
                        self.show(bytes);
                    } else if let Some(adjust) = number(item) {
                        if -adjust > WORD_GAP_THOUSANDTHS {
                            self.builder.flush();
                        }
                        let tx = -adjust / 1000.0
                            * self.state.font_size
                            * self.state.horizontal_scale;
                        self.text_matrix = Matrix::translate(tx, 0.0).then(self.text_matrix);
                    }
                }
            }
            _ => {}
        }
    }

    fn set(&mut self, operands: &[Object], apply: impl FnOnce(&mut TextState, f32)) {
        if let Some(value) = nth(operands, 0) {
            apply(&mut self.state, value);
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.builder.flush();
        self.line_matrix = Matrix::translate(tx, ty).then(self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.state.leading;
        self.move_line(0.0, -leading);
    }

    fn show(&mut self, bytes: &[u8]) {
        let state = self.state;
        for c in decode_text(bytes) {
            let glyph_width = GLYPH_ADVANCE_EM * state.font_size;
            let advance = (glyph_width
                + state.char_spacing
                + if c == ' ' { state.word_spacing } else { 0.0 })
                * state.horizontal_scale;

            if c.is_whitespace() || c.is_control() {
                self.builder.flush();
            } else {
                let to_page = self.text_matrix.then(self.ctm);
                let bottom = state.rise - DESCENT_EM * state.font_size;
                let top = state.rise + ASCENT_EM * state.font_size;
                let right = glyph_width * state.horizontal_scale;

                let corners = [
                    to_page.apply(0.0, bottom),
                    to_page.apply(right, bottom),
                    to_page.apply(0.0, top),
                    to_page.apply(right, top),
                ];
                let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
                let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
                let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
                let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

                self.builder.push(
                    c,
                    min_x - self.media_box.x0,
                    self.media_box.y1 - max_y,
                    max_x - self.media_box.x0,
                    self.media_box.y1 - min_y,
                );
            }

            self.text_matrix = Matrix::translate(advance, 0.0).then(self.text_matrix);
        }
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn nth(operands: &[Object], index: usize) -> Option<f32> {
    operands.get(index).and_then(number)
}

fn matrix(operands: &[Object]) -> Option<Matrix> {
    if operands.len() != 6 {
        return None;
    }
    let mut values = [0.0; 6];
    for (slot, operand) in values.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(Matrix(values))
}

fn string_bytes(object: &Object) -> Option<&[u8]> {
    match object {
        Object::String(bytes, _) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// UTF-16BE when the string carries a byte-order mark, Latin-1 otherwise.
fn decode_text(bytes: &[u8]) -> Vec<char> {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> =
            rest.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        return char::decode_utf16(units).map(|c| c.unwrap_or('\u{FFFD}')).collect();
    }
    bytes.iter().map(|&b| b as char).collect()
}

pub(crate) fn extract_spans(
    content: &[u8],
    media_box: &MediaBox,
) -> Result<Vec<TextSpan>, PdfEngineError> {
    if content.is_empty() {
        return Ok(Vec::new());
    }
    let content = Content::decode(content)?;
    let mut interpreter = Interpreter::new(media_box);
    for operation in &content.operations {
        interpreter.operate(&operation.operator, &operation.operands);
    }
    Ok(interpreter.builder.finish())
}

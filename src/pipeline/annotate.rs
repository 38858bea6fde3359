//! Box and label rendering for streamed frames.
//!
//! Text uses a built-in 5x7 bitmap font (upper-case, digits and the
//! punctuation that appears in labels), scaled by `TEXT_SCALE`.

use crate::frame::{BoundingBox, Frame};
use crate::pipeline::PredictionRecord;

pub const FRESH_COLOUR: [u8; 3] = [0, 255, 0];
pub const ROTTEN_COLOUR: [u8; 3] = [255, 0, 0];
pub const TEXT_COLOUR: [u8; 3] = [255, 255, 255];
pub const STROKE_WIDTH: i64 = 2;
pub const TEXT_SCALE: i64 = 2;

const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
const GLYPH_ADVANCE: i64 = GLYPH_WIDTH + 1;
const LABEL_PADDING: i64 = 10;

/// Text drawn above a record's box.
pub fn label_text(record: &PredictionRecord) -> String {
    match record {
        PredictionRecord::Classified {
            label,
            confidence,
            detector_confidence,
            ..
        } => format!("{} ({:.2}/{:.2})", label, detector_confidence, confidence),
        PredictionRecord::Failed {
            detected_object, ..
        } => format!("{} (detector only)", detected_object),
    }
}

/// Green for fresh produce, red for everything else.
pub fn box_colour(record: &PredictionRecord) -> [u8; 3] {
    match record.label() {
        Some(label) if label.is_fresh() => FRESH_COLOUR,
        _ => ROTTEN_COLOUR,
    }
}

/// Pixel size of `text` at `scale`.
pub fn text_size(text: &str, scale: i64) -> (i64, i64) {
    let chars = text.chars().count() as i64;
    let width = if chars == 0 {
        0
    } else {
        (chars * GLYPH_ADVANCE - 1) * scale
    };
    (width, GLYPH_HEIGHT * scale)
}

pub fn draw_predictions(frame: &mut Frame, records: &[PredictionRecord]) {
    for record in records {
        let bbox = record.bbox();
        let colour = box_colour(record);
        draw_rect(frame, &bbox, colour, STROKE_WIDTH);

        let text = label_text(record);
        let (text_w, text_h) = text_size(&text, TEXT_SCALE);
        let (x1, y1) = (bbox.x1 as i64, bbox.y1 as i64);
        fill_rect(frame, x1, y1 - text_h - LABEL_PADDING, x1 + text_w, y1, colour);
        draw_text(frame, x1, y1 - text_h - LABEL_PADDING / 2, &text, TEXT_COLOUR, TEXT_SCALE);
    }
}

/// Outline `bbox` with a stroke drawn inward from its edges.
pub fn draw_rect(frame: &mut Frame, bbox: &BoundingBox, colour: [u8; 3], stroke: i64) {
    let (x1, y1, x2, y2) = (
        bbox.x1 as i64,
        bbox.y1 as i64,
        bbox.x2 as i64,
        bbox.y2 as i64,
    );
    fill_rect(frame, x1, y1, x2, y1 + stroke, colour);
    fill_rect(frame, x1, y2 - stroke, x2, y2, colour);
    fill_rect(frame, x1, y1, x1 + stroke, y2, colour);
    fill_rect(frame, x2 - stroke, y1, x2, y2, colour);
}

/// Fill `[x1, x2) x [y1, y2)`, clipped to the frame.
pub fn fill_rect(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, colour: [u8; 3]) {
    let (x1, x2) = (x1.max(0), x2.min(frame.width as i64));
    let (y1, y2) = (y1.max(0), y2.min(frame.height as i64));
    for y in y1..y2 {
        for x in x1..x2 {
            frame.put_rgb(x, y, colour);
        }
    }
}

/// Draw `text` with its top-left corner at `(x, y)`.
pub fn draw_text(frame: &mut Frame, x: i64, y: i64, text: &str, colour: [u8; 3], scale: i64) {
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i64 * GLYPH_ADVANCE * scale;
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = y + row as i64 * scale;
                fill_rect(frame, px, py, px + scale, py + scale, colour);
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;
    use crate::labels::FreshnessLabel;

    fn black_frame() -> Frame {
        Frame::new(vec![0u8; 200 * 120 * 3], 200, 120, ChannelOrder::Bgr).unwrap()
    }

    fn classified(label: FreshnessLabel) -> PredictionRecord {
        PredictionRecord::Classified {
            bbox: BoundingBox::new(40, 60, 120, 110),
            label,
            confidence: 0.934,
            detected_object: label.fruit().as_str().to_string(),
            detector_confidence: 0.871,
        }
    }

    #[test]
    fn label_text_formats() {
        assert_eq!(
            label_text(&classified(FreshnessLabel::AppleFresh)),
            "apple_fresh (0.87/0.93)"
        );
        let failed = PredictionRecord::Failed {
            bbox: BoundingBox::new(0, 0, 10, 10),
            error: "Classification failed: x".to_string(),
            detected_object: "banana".to_string(),
            detector_confidence: 0.4,
        };
        assert_eq!(label_text(&failed), "banana (detector only)");
        assert_eq!(box_colour(&failed), ROTTEN_COLOUR);
    }

    #[test]
    fn fresh_boxes_are_green_and_rotten_red() {
        let mut frame = black_frame();
        draw_predictions(&mut frame, &[classified(FreshnessLabel::BananaFresh)]);
        assert_eq!(frame.rgb_at(40, 80), FRESH_COLOUR);
        assert_eq!(frame.rgb_at(119, 80), FRESH_COLOUR);
        // Interior untouched.
        assert_eq!(frame.rgb_at(80, 90), [0, 0, 0]);

        let mut frame = black_frame();
        draw_predictions(&mut frame, &[classified(FreshnessLabel::OrangeRotten)]);
        assert_eq!(frame.rgb_at(40, 80), ROTTEN_COLOUR);
    }

    #[test]
    fn label_background_sits_above_box() {
        let mut frame = black_frame();
        let record = classified(FreshnessLabel::AppleFresh);
        draw_predictions(&mut frame, &[record.clone()]);
        let (_, text_h) = text_size(&label_text(&record), TEXT_SCALE);
        let top = 60 - text_h - LABEL_PADDING;
        // Left padding column of the label background is never covered by glyphs.
        assert_eq!(frame.rgb_at(40, top as u32), FRESH_COLOUR);
        assert_eq!(frame.rgb_at(40, (top - 1) as u32), [0, 0, 0]);
    }

    #[test]
    fn drawing_near_edges_is_clipped() {
        let mut frame = black_frame();
        let record = PredictionRecord::Classified {
            bbox: BoundingBox::new(0, 0, 200, 120),
            label: FreshnessLabel::AppleRotten,
            confidence: 0.5,
            detected_object: "apple".to_string(),
            detector_confidence: 0.5,
        };
        draw_predictions(&mut frame, &[record]);
        assert_eq!(frame.rgb_at(0, 0), ROTTEN_COLOUR);
        assert_eq!(frame.rgb_at(199, 119), ROTTEN_COLOUR);
    }

    #[test]
    fn text_is_drawn_in_white() {
        let mut frame = black_frame();
        draw_text(&mut frame, 0, 0, "1", TEXT_COLOUR, 1);
        // Top row of '1' is a single pixel at column 2.
        assert_eq!(frame.rgb_at(2, 0), TEXT_COLOUR);
        assert_eq!(frame.rgb_at(0, 0), [0, 0, 0]);
        assert_eq!(text_size("ab", 2), (22, 14));
    }
}

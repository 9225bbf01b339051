//! Console helpers for summaries and dashboards.
use crate::metrics::{trailing_mean, ConfusionMatrix};
use crate::network::{Network, PIXEL_MEAN, PIXEL_STD};
use crate::tensor::{Matrix, Vector};

/// Print model summary
pub fn print_model_summary(net: &Network) {
    println!("Model Summary:\n{}", net);
}

/// Mean of a recorded series over all of it and over its most recent tenth.
pub fn summarize_series(values: &[f32], title: &str) -> String {
    let recent = (values.len() / 10).max(1);
    let mut out = format!("{title}: {} points\n", values.len());
    if let Some(all) = trailing_mean(values, values.len()) {
        out.push_str(&format!("  {:<10}{all:>12.6}\n", "all"));
    }
    if let Some(last) = trailing_mean(values, recent) {
        out.push_str(&format!("  {:<10}{last:>12.6}\n", format!("last {recent}")));
    }
    out
}

/// Confusion matrix as text, rows = predicted, columns = actual.
pub fn format_confusion(cm: &ConfusionMatrix) -> String {
    let mut out = String::from("pred\\true");
    for c in 0..cm.classes() {
        out.push_str(&format!("{c:>6}"));
    }
    out.push('\n');
    for r in 0..cm.classes() {
        out.push_str(&format!("{r:>9}"));
        for count in cm.row(r) {
            out.push_str(&format!("{count:>6}"));
        }
        out.push('\n');
    }
    out
}

/// Render a 0-255 image as text using a coarse intensity ramp.
pub fn render_digit(image: &Matrix) -> String {
    const RAMP: &[u8] = b" .:-=+*#%@";
    let mut out = String::with_capacity(image.len() + image.rows());
    for r in 0..image.rows() {
        for &px in image.row(r) {
            let level = (px.clamp(0.0, 255.0) / 256.0 * RAMP.len() as f32) as usize;
            out.push(RAMP[level.min(RAMP.len() - 1)] as char);
        }
        out.push('\n');
    }
    out
}

/// Render a standardised input vector as a `cols`-wide image.
pub fn render_input(input: &Vector, cols: usize) -> String {
    let cols = cols.max(1);
    let mut pixels: Vec<f32> = input
        .iter()
        .map(|&v| (v * PIXEL_STD + PIXEL_MEAN) * 255.0)
        .collect();
    let rows = pixels.len().div_ceil(cols);
    pixels.resize(rows * cols, 0.0);
    match Matrix::from_vec(rows, cols, pixels) {
        Ok(image) => render_digit(&image),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dark_and_bright_pixels() {
        let img = Matrix::from_vec(1, 3, vec![0.0, 128.0, 255.0]).unwrap();
        assert_eq!(render_digit(&img), " +@\n");
    }

    #[test]
    fn prepared_input_renders_like_raw_image() {
        let raw = Matrix::from_vec(2, 2, vec![0.0, 255.0, 100.0, 0.0]).unwrap();
        let input = crate::network::prepare_input(&raw);
        assert_eq!(render_input(&input, 2), " @\n- \n");
        // a short last row is padded with background
        assert_eq!(render_input(&input, 3), " @-\n   \n");
    }

    #[test]
    fn series_summary_covers_whole_and_tail() {
        let values: Vec<f32> = (1..=20).map(|v| v as f32).collect();
        let text = summarize_series(&values, "loss");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "loss: 20 points");
        assert!(lines[1].ends_with("10.500000"));
        assert!(lines[2].contains("last 2") && lines[2].ends_with("19.500000"));
        assert_eq!(summarize_series(&[], "loss"), "loss: 0 points\n");
    }

    #[test]
    fn confusion_text_has_header_and_rows() {
        let mut cm = ConfusionMatrix::new(2);
        cm.record(1, 0);
        let text = format_confusion(&cm);
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(2).unwrap().ends_with("     1     0"));
    }
}

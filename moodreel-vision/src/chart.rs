use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([220, 220, 220]);
const MARGIN: u32 = 32;
const LEGEND_SWATCH: u32 = 10;

/// Histogram of several series over `[0, 1]`, bars stacked in series order.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedHistogram {
    /// `densities[bin][series]`
    pub densities: Vec<Vec<f64>>,
}

impl StackedHistogram {
    /// Counts are normalised over every value of every series so the stacked
    /// bars integrate to 1.
    pub fn compute<S: AsRef<[f64]>>(series: &[S], bins: usize) -> Self {
        let bins = bins.max(1);
        let width = 1.0 / bins as f64;
        let mut counts = vec![vec![0usize; series.len()]; bins];
        let mut total = 0usize;

        for (s, values) in series.iter().enumerate() {
            for &v in values.as_ref() {
                if !v.is_finite() {
                    continue;
                }
                let bin = ((v.clamp(0.0, 1.0) / width) as usize).min(bins - 1);
                counts[bin][s] += 1;
                total += 1;
            }
        }

        let densities = counts
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|c| {
                        if total == 0 {
                            0.0
                        } else {
                            c as f64 / (total as f64 * width)
                        }
                    })
                    .collect()
            })
            .collect();

        Self { densities }
    }

    pub fn bins(&self) -> usize {
        self.densities.len()
    }

    /// Height of the tallest stacked bar.
    pub fn peak(&self) -> f64 {
        self.densities
            .iter()
            .map(|row| row.iter().sum::<f64>())
            .fold(0.0, f64::max)
    }

    pub fn render(&self, colors: &[[u8; 3]], width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
        if width <= 2 * MARGIN || height <= 2 * MARGIN || self.bins() == 0 {
            return img;
        }

        let plot_w = width - 2 * MARGIN;
        let plot_h = height - 2 * MARGIN;
        let left = MARGIN as f32;
        let bottom = (height - MARGIN) as f32;

        for tick in 1..=4 {
            let y = bottom - plot_h as f32 * tick as f32 / 4.0;
            draw_line_segment_mut(&mut img, (left, y), (left + plot_w as f32, y), GRID);
        }

        let peak = self.peak();
        let scale = if peak > 0.0 { plot_h as f64 / peak } else { 0.0 };
        let bar_w = (plot_w / self.bins() as u32).max(1);

        for (bin, row) in self.densities.iter().enumerate() {
            let x = MARGIN + bin as u32 * bar_w;
            let mut y = height - MARGIN;
            for (s, density) in row.iter().enumerate() {
                let h = ((density * scale).round() as u32).min(y - MARGIN);
                if h == 0 {
                    continue;
                }
                y -= h;
                let color = colors.get(s).copied().unwrap_or([128, 128, 128]);
                let rect = Rect::at(x as i32, y as i32).of_size(bar_w.saturating_sub(1).max(1), h);
                draw_filled_rect_mut(&mut img, rect, Rgb(color));
            }
        }

        draw_line_segment_mut(&mut img, (left, bottom), (left + plot_w as f32, bottom), AXIS);
        draw_line_segment_mut(&mut img, (left, bottom), (left, MARGIN as f32), AXIS);

        for (s, color) in colors.iter().enumerate() {
            let x = width - MARGIN + 4;
            let y = MARGIN + s as u32 * (LEGEND_SWATCH + 2);
            if x + LEGEND_SWATCH > width || y + LEGEND_SWATCH > height {
                break;
            }
            let rect = Rect::at(x as i32, y as i32).of_size(LEGEND_SWATCH, LEGEND_SWATCH);
            draw_filled_rect_mut(&mut img, rect, Rgb(*color));
        }

        img
    }

    pub fn save(&self, path: &Path, colors: &[[u8; 3]], width: u32, height: u32) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        self.render(colors, width, height)
            .save(path)
            .with_context(|| format!("writing chart {}", path.display()))
    }
}

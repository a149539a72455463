use image::DynamicImage;
use std::io::{self, Write};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent},
    terminal::{self, ClearType},
};

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKey {
    Capture,
    Cancel,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        Self {
            width: width.unwrap_or(term_width.min(DEFAULT_WIDTH)).max(8),
            height: height.unwrap_or(term_height.saturating_sub(5).min(DEFAULT_HEIGHT)).max(4),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Frame with a caption line on top and, for documents, a corner guide.
    pub fn render_frame(&self, image: &DynamicImage, caption: &str, document_guide: bool) -> String {
        let mut grid = self.image_to_ascii(image);

        if document_guide {
            self.draw_corner_guide(&mut grid);
        }
        self.overlay_text(&mut grid, caption, self.width / 2, 0);

        self.grid_to_string(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let ramp: Vec<char> = ASCII_RAMP.chars().collect();

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();
        if img_width == 0 || img_height == 0 {
            return grid;
        }

        // terminal cells are roughly twice as tall as wide; sampling the full
        // image into the grid keeps the aspect close enough for framing
        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0] as usize;
                    *cell = ramp[brightness * (ramp.len() - 1) / 255];
                }
            }
        }

        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }

        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    /// Card-shaped frame, 10% inset from every edge.
    fn draw_corner_guide(&self, grid: &mut [Vec<char>]) {
        let x1 = self.width / 10;
        let x2 = self.width - 1 - self.width / 10;
        let y1 = self.height / 10 + 1;
        let y2 = self.height - 1 - self.height / 10;
        if x2 <= x1 + 2 || y2 <= y1 + 2 {
            return;
        }

        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';
        for x in [x1 + 1, x2 - 1] {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for y in [y1 + 1, y2 - 1] {
            grid[y][x1] = '│';
            grid[y][x2] = '│';
        }
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().take(self.width).collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

pub fn clear_screen() -> io::Result<()> {
    crossterm::execute!(
        io::stdout(),
        terminal::Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    io::stdout().flush()
}

/// Non-blocking key check: space/enter captures, esc/q cancels.
pub fn poll_key() -> io::Result<Option<PreviewKey>> {
    if event::poll(std::time::Duration::from_millis(0))? {
        if let Event::Key(KeyEvent { code, .. }) = event::read()? {
            return Ok(match code {
                KeyCode::Char(' ') | KeyCode::Enter => Some(PreviewKey::Capture),
                KeyCode::Esc | KeyCode::Char('q') => Some(PreviewKey::Cancel),
                _ => None,
            });
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn renders_fixed_grid_with_caption() {
        let renderer = AsciiRenderer::new(Some(20), Some(6));
        let white = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(40, 40, Luma([255u8])));

        let out = renderer.render_frame(&white, "Ready", false);
        let lines: Vec<&str> = out.split("\r\n").collect();
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|l| l.chars().count() == 20));
        assert!(lines[0].contains("Ready"));
        assert!(lines[3].chars().all(|c| c == '@'));
    }

    #[test]
    fn document_guide_draws_corners() {
        let renderer = AsciiRenderer::new(Some(40), Some(20));
        let black = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(10, 10, Luma([0u8])));

        let out = renderer.render_frame(&black, "", true);
        assert!(out.contains('┌') && out.contains('┘'));
    }
}

//! Client-side copy of the remote desktop, 32bpp BGRX.

use std::io::{self, Read, Write};

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

impl Framebuffer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; usize::from(width) * usize::from(height) * BYTES_PER_PIXEL],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Discard the contents and reallocate at the new size.
    pub fn resize(&mut self, width: u16, height: u16) {
        *self = Self::new(width, height);
    }

    /// Copy a tightly packed BGRX rectangle into place.
    ///
    /// Parts outside the framebuffer are clipped.
    pub fn blit(&mut self, x: u16, y: u16, width: u16, height: u16, data: &[u8]) {
        let src_stride = usize::from(width) * BYTES_PER_PIXEL;
        let Some((cols, rows)) = self.clip(x, y, width, height) else {
            return;
        };
        let row_bytes = cols * BYTES_PER_PIXEL;
        for row in 0..rows {
            let src = row * src_stride;
            let Some(src_row) = data.get(src..src + row_bytes) else {
                return;
            };
            let dst = self.offset(usize::from(x), usize::from(y) + row);
            self.pixels[dst..dst + row_bytes].copy_from_slice(src_row);
        }
    }

    /// Decode a Raw rectangle straight from `rd`, one row at a time.
    ///
    /// The whole rectangle is consumed; whatever falls outside the
    /// framebuffer is read and dropped.
    pub fn read_raw<R: Read>(
        &mut self,
        rd: &mut R,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    ) -> io::Result<()> {
        let mut row = vec![0u8; usize::from(width) * BYTES_PER_PIXEL];
        for dy in 0..height {
            rd.read_exact(&mut row)?;
            if let Some(row_y) = y.checked_add(dy) {
                self.blit(x, row_y, width, 1, &row);
            }
        }
        Ok(())
    }

    /// Copy a rectangle within the framebuffer (CopyRect).
    pub fn copy_within(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16) {
        let Some((dst_cols, dst_rows)) = self.clip(x, y, width, height) else {
            return;
        };
        let Some((src_cols, src_rows)) = self.clip(src_x, src_y, width, height) else {
            return;
        };
        let cols = dst_cols.min(src_cols);
        let rows = dst_rows.min(src_rows);
        let row_bytes = cols * BYTES_PER_PIXEL;

        // Walk rows bottom-up when moving down so overlapping rows are
        // read before they are overwritten.
        let order: Box<dyn Iterator<Item = usize>> = if y > src_y {
            Box::new((0..rows).rev())
        } else {
            Box::new(0..rows)
        };
        for row in order {
            let src = self.offset(usize::from(src_x), usize::from(src_y) + row);
            let dst = self.offset(usize::from(x), usize::from(y) + row);
            self.pixels.copy_within(src..src + row_bytes, dst);
        }
    }

    /// Write the framebuffer as a binary PPM (P6) image.
    pub fn write_ppm<W: Write>(&self, mut out: W) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let mut rgb = Vec::with_capacity(self.pixels.len() / BYTES_PER_PIXEL * 3);
        for px in self.pixels.chunks_exact(BYTES_PER_PIXEL) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        out.write_all(&rgb)?;
        out.flush()
    }

    fn clip(&self, x: u16, y: u16, width: u16, height: u16) -> Option<(usize, usize)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let cols = usize::from(width.min(self.width - x));
        let rows = usize::from(height.min(self.height - y));
        (cols > 0 && rows > 0).then_some((cols, rows))
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (y * usize::from(self.width) + x) * BYTES_PER_PIXEL
    }
}

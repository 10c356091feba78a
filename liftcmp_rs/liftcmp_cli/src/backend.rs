//! Drawing backend wrapper for machines without usable system fonts.
//!
//! Lab workstations and CI images often lack the fonts plotters looks
//! up. Text that cannot be laid out is dropped and sized by a rough
//! estimate, so the lines of a comparison still get drawn.

use std::panic::{self, AssertUnwindSafe};

use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend, DrawingErrorKind,
};

pub struct TextTolerantBackend<DB> {
    inner: DB,
    dropped_text: usize,
}

impl<DB> TextTolerantBackend<DB> {
    pub fn new(inner: DB) -> Self {
        Self {
            inner,
            dropped_text: 0,
        }
    }
}

/// Outcome of a text operation that may fail for want of a font.
enum TextOutcome<T, E: std::error::Error + Send + Sync> {
    Done(T),
    NoFont,
    Failed(DrawingErrorKind<E>),
}

fn guard_text<T, E, F>(op: F) -> TextOutcome<T, E>
where
    E: std::error::Error + Send + Sync,
    F: FnOnce() -> Result<T, DrawingErrorKind<E>>,
{
    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(value)) => TextOutcome::Done(value),
        Ok(Err(DrawingErrorKind::FontError(_))) | Err(_) => TextOutcome::NoFont,
        Ok(Err(err)) => TextOutcome::Failed(err),
    }
}

/// Width and height of `text` at `size` px, assuming glyphs 0.6 em wide.
pub(crate) fn rough_text_size(text: &str, size: f64) -> (u32, u32) {
    let width = text.chars().count() as f64 * size * 6.0 / 10.0;
    (width.ceil() as u32, size.ceil() as u32)
}

impl<DB: DrawingBackend> DrawingBackend for TextTolerantBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        if self.dropped_text > 0 {
            tracing::debug!("{} text element(s) dropped for lack of a font", self.dropped_text);
        }
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.fill_polygon(vert, style)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        let inner = &mut self.inner;
        match guard_text(|| inner.draw_text(text, style, pos)) {
            TextOutcome::Done(()) => Ok(()),
            TextOutcome::NoFont => {
                self.dropped_text += 1;
                Ok(())
            }
            TextOutcome::Failed(err) => Err(err),
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<DB::ErrorType>> {
        match guard_text(|| self.inner.estimate_text_size(text, style)) {
            TextOutcome::Done(size) => Ok(size),
            TextOutcome::NoFont | TextOutcome::Failed(_) => {
                Ok(rough_text_size(text, style.size()))
            }
        }
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the full emulated display surface.
pub const SCREEN_WIDTH: usize = 768;
/// Height of the full emulated display surface (both fields).
pub const SCREEN_HEIGHT: usize = 576;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewportError {
    #[error("Invalid viewport bounds ({left}, {top}) - ({right}, {bottom})")]
    InvalidBounds {
        left: usize,
        top: usize,
        right: usize,
        bottom: usize,
    },
}

/// Visible sub-rectangle of the display surface, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportRect {
    left: usize,
    top: usize,
    right: usize,
    bottom: usize,
}

impl ViewportRect {
    pub const FULL: ViewportRect = ViewportRect {
        left: 0,
        top: 0,
        right: SCREEN_WIDTH - 1,
        bottom: SCREEN_HEIGHT - 1,
    };

    pub fn new(left: usize, top: usize, right: usize, bottom: usize) -> Result<Self, ViewportError> {
        if left >= right || top >= bottom || right >= SCREEN_WIDTH || bottom >= SCREEN_HEIGHT {
            return Err(ViewportError::InvalidBounds {
                left,
                top,
                right,
                bottom,
            });
        }
        Ok(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    pub fn left(&self) -> usize {
        self.left
    }

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn right(&self) -> usize {
        self.right
    }

    pub fn bottom(&self) -> usize {
        self.bottom
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    pub fn contains_row(&self, y: usize) -> bool {
        (self.top..=self.bottom).contains(&y)
    }
}

impl Default for ViewportRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Tuning for content/border detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderDetectConfig {
    /// Rows at the top of the frame sampled for the border color
    pub border_sample_lines: usize,
    /// Narrower detected content is rejected
    pub min_width: usize,
    /// Shorter detected content is rejected
    pub min_height: usize,
    /// Extra pixels kept around the detected content on each side
    pub keep_border: usize,
}

impl Default for BorderDetectConfig {
    fn default() -> Self {
        Self {
            border_sample_lines: 5,
            min_width: 200,
            min_height: 150,
            keep_border: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    first_row: usize,
    last_row: usize,
    first_col: usize,
    last_col: usize,
}

impl Bounds {
    fn empty() -> Self {
        Self {
            first_row: SCREEN_HEIGHT,
            last_row: 0,
            first_col: SCREEN_WIDTH,
            last_col: 0,
        }
    }

    fn add_row(&mut self, y: usize) {
        self.first_row = self.first_row.min(y);
        self.last_row = self.last_row.max(y);
    }
}

/// Accumulates content edges over one assembly pass.
///
/// The border color is the first non-black pixel found in the sampled top
/// rows. With a border color, content is anything that differs from it;
/// otherwise content is anything that is not black.
pub(crate) struct BorderScan {
    config: BorderDetectConfig,
    border_color: u32,
    nonzero: Bounds,
    nonborder: Bounds,
}

impl BorderScan {
    pub fn new(config: BorderDetectConfig) -> Self {
        Self {
            config,
            border_color: 0,
            nonzero: Bounds::empty(),
            nonborder: Bounds::empty(),
        }
    }

    /// Scan one full-width row of mapped pixels at frame row `y`.
    pub fn scan_row(&mut self, y: usize, row: &[u32]) {
        let mut any_nonzero = false;
        let mut any_nonborder = false;

        for (x, &px) in row.iter().enumerate() {
            if px == 0 {
                continue;
            }
            if !any_nonzero {
                any_nonzero = true;
                self.nonzero.first_col = self.nonzero.first_col.min(x);
                if y < self.config.border_sample_lines && self.border_color == 0 {
                    self.border_color = px;
                }
            }
            self.nonzero.last_col = self.nonzero.last_col.max(x);

            if px != self.border_color {
                if !any_nonborder {
                    any_nonborder = true;
                    self.nonborder.first_col = self.nonborder.first_col.min(x);
                }
                self.nonborder.last_col = self.nonborder.last_col.max(x);
            }
        }

        if any_nonzero {
            self.nonzero.add_row(y);
        }
        if any_nonborder {
            self.nonborder.add_row(y);
        }
    }

    /// Detected content rectangle, if it passes the size thresholds.
    pub fn result(&self) -> Option<ViewportRect> {
        let b = if self.border_color != 0 {
            self.nonborder
        } else {
            self.nonzero
        };
        if b.first_row > b.last_row || b.first_col > b.last_col {
            return None;
        }
        if b.last_col - b.first_col + 1 < self.config.min_width
            || b.last_row - b.first_row + 1 < self.config.min_height
        {
            return None;
        }

        let keep = self.config.keep_border;
        ViewportRect::new(
            b.first_col.saturating_sub(keep),
            b.first_row.saturating_sub(keep),
            (b.last_col + keep).min(SCREEN_WIDTH - 1),
            (b.last_row + keep).min(SCREEN_HEIGHT - 1),
        )
        .ok()
    }
}

//! Greedy spline corridor index.
//!
//! An online piecewise-linear approximation of `key -> logical page id`
//! with a bounded prediction error, after "Smooth interpolating
//! histograms with error guarantees" (Neumann & Michel, BNCOD '08). The
//! model absorbs points as long as they stay inside the error corridor
//! spanned by the current upper and lower limit vectors; when a point
//! falls outside, the previously seen point becomes permanent and the
//! corridor restarts from the new point.
//!
//! Points live in a fixed-capacity ring. Old points are dropped either
//! when the ring is full or when the log reclaims the pages they map.

use crate::common::error::{Result, TidelogError};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Point {
    pub key: u64,
    pub page: u32,
}

/// The estimate returned by [`Spline::find`]: a predicted page and the
/// corridor of pages the key could actually be on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Fit {
    pub loc: u32,
    pub low: u32,
    pub high: u32,
}

pub(crate) struct Spline {
    points: Vec<Point>,
    start: usize,
    count: usize,
    capacity: usize,
    max_error: usize,
    /// First point ever trained; anchors estimates for keys that have
    /// fallen off the front of the ring.
    first_point: Point,
    last_key: u64,
    last_loc: u32,
    upper: Point,
    lower: Point,
    /// The newest ring entry is provisional and is overwritten by the
    /// next add unless the corridor breaks first.
    temp_last: bool,
    add_calls: u64,
}

/// True if vector (x1, y1) is counter-clockwise of (x2, y2).
fn is_left(x1: u64, y1: i64, x2: u64, y2: i64) -> bool {
    y1 as i128 * x2 as i128 > y2 as i128 * x1 as i128
}

/// True if vector (x1, y1) is clockwise of (x2, y2).
fn is_right(x1: u64, y1: i64, x2: u64, y2: i64) -> bool {
    y1 as i128 * (x2 as i128) < y2 as i128 * x1 as i128
}

impl Spline {
    pub fn new(capacity: usize, max_error: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(TidelogError::Config(
                "spline needs room for at least two points".to_string(),
            ));
        }
        Ok(Self {
            points: vec![Point::default(); capacity],
            start: 0,
            count: 0,
            capacity,
            max_error,
            first_point: Point::default(),
            last_key: 0,
            last_loc: 0,
            upper: Point::default(),
            lower: Point::default(),
            temp_last: false,
            add_calls: 0,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn point(&self, index: usize) -> Point {
        self.points[(self.start + index) % self.capacity]
    }

    fn set_point(&mut self, index: usize, point: Point) {
        let slot = (self.start + index) % self.capacity;
        self.points[slot] = point;
    }

    /// Drops the oldest point unconditionally to make room for a new one.
    fn make_room(&mut self) {
        if self.count >= self.capacity {
            self.start = (self.start + 1) % self.capacity;
            self.count -= 1;
        }
    }

    /// Trains the model with the min key of a freshly written page. Keys
    /// must be strictly ascending; duplicates and regressions are
    /// ignored.
    pub fn add(&mut self, key: u64, page: u32) {
        self.add_calls += 1;

        if self.add_calls == 1 {
            let point = Point { key, page };
            self.set_point(0, point);
            self.first_point = point;
            self.count = 1;
            self.last_key = key;
            return;
        }

        if self.add_calls == 2 {
            // Second point seeds the corridor.
            self.lower = Point {
                key,
                page: page.saturating_sub(self.max_error as u32),
            };
            self.upper = Point {
                key,
                page: page + self.max_error as u32,
            };
            self.last_key = key;
            self.last_loc = page;
            return;
        }

        if key <= self.last_key {
            return;
        }

        if self.temp_last {
            self.count -= 1;
        }

        let last = self.point(self.count - 1);
        let xdiff = key - last.key;
        let ydiff = i64::from(page) - i64::from(last.page);
        let upper_x = self.upper.key - last.key;
        let upper_y = i64::from(self.upper.page) - i64::from(last.page);
        let lower_x = self.lower.key - last.key;
        let lower_y = i64::from(self.lower.page) - i64::from(last.page);

        let clamped_low = page.saturating_sub(self.max_error as u32);

        if is_left(xdiff, ydiff, upper_x, upper_y)
            || is_right(xdiff, ydiff, lower_x, lower_y)
        {
            // Outside the corridor: the previously seen point becomes
            // permanent and the corridor restarts here.
            self.make_room();
            self.set_point(
                self.count,
                Point {
                    key: self.last_key,
                    page: self.last_loc,
                },
            );
            self.count += 1;
            self.temp_last = false;

            self.lower = Point {
                key,
                page: clamped_low,
            };
            self.upper = Point {
                key,
                page: page + self.max_error as u32,
            };
        } else {
            // Inside: tighten whichever limit the new point constrains.
            let upper_cand_y =
                i64::from(page + self.max_error as u32) - i64::from(last.page);
            if is_left(upper_x, upper_y, xdiff, upper_cand_y) {
                self.upper = Point {
                    key,
                    page: page + self.max_error as u32,
                };
            }
            let lower_cand_y = i64::from(clamped_low) - i64::from(last.page);
            if is_right(lower_x, lower_y, xdiff, lower_cand_y) {
                self.lower = Point {
                    key,
                    page: clamped_low,
                };
            }
        }

        self.last_loc = page;
        self.last_key = key;

        // Provisional last point; the next add may take its place.
        self.make_room();
        self.set_point(self.count, Point { key, page });
        self.count += 1;
        self.temp_last = true;
    }

    /// Predicts the page holding `key` and the corridor around it.
    pub fn find(&self, key: u64) -> Fit {
        self.find_within(key, None)
    }

    /// Like [`Spline::find`], but restricts the segment search to the
    /// point index bounds a radix table produced.
    pub fn find_within(
        &self,
        key: u64,
        bounds: Option<(usize, usize)>,
    ) -> Fit {
        let first = self.point(0);
        if key < first.key {
            // Below anything on record; fall back to the anchor.
            let page = self.first_point.page;
            return Fit {
                loc: page,
                low: page,
                high: page,
            };
        }
        let last = self.point(self.count - 1);
        if self.count == 1 || key > last.key {
            return Fit {
                loc: last.page,
                low: last.page,
                high: last.page,
            };
        }

        let (lo, hi) = bounds.unwrap_or((1, self.count - 1));
        let segment =
            self.segment_for(key, lo.max(1), hi.min(self.count - 1).max(1));
        self.interpolate(key, segment, last.page)
    }

    /// First index in `[lo, hi]` whose key is >= `key`, the upper end of
    /// the spline segment containing it. Bounds must be valid indexes.
    pub(crate) fn segment_for(
        &self,
        key: u64,
        lo: usize,
        hi: usize,
    ) -> usize {
        let mut lo = lo.max(1);
        let mut hi = hi;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.point(mid).key < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Interpolates within the segment ending at `segment` and widens by
    /// the error bound, clamped to `[0, last_page]`.
    pub(crate) fn interpolate(
        &self,
        key: u64,
        segment: usize,
        last_page: u32,
    ) -> Fit {
        let down = self.point(segment - 1);
        let up = self.point(segment);
        let loc = if up.key == down.key {
            down.page
        } else {
            // u128 keeps the product exact for 8-byte keys.
            let scaled = (key - down.key) as u128
                * u128::from(up.page - down.page)
                / (up.key - down.key) as u128;
            down.page + scaled as u32
        };
        Fit {
            loc,
            low: loc.saturating_sub(self.max_error as u32),
            high: (loc + self.max_error as u32).min(last_page),
        }
    }

    /// Rotates `n` points off the front of the ring. Refuses to leave
    /// fewer than two points.
    pub fn erase(&mut self, n: usize) -> Result<()> {
        if n > self.count || self.count - n <= 1 {
            return Err(TidelogError::Internal(
                "erase would leave fewer than two spline points".to_string(),
            ));
        }
        if n == 0 {
            return Ok(());
        }
        self.count -= n;
        self.start = (self.start + n) % self.capacity;
        Ok(())
    }

    /// Drops the longest prefix of points that map pages below
    /// `min_key`, always keeping at least one point. Called when the log
    /// reclaims an erase block; the next page write re-trains the model
    /// right after, so a one-point spline is only ever transient.
    pub fn clean(&mut self, min_key: u64) {
        if self.count == 0 {
            return;
        }
        let mut n = 0;
        while n < self.count && self.point(n).key < min_key {
            n += 1;
        }
        n = n.min(self.count - 1);
        if n == 0 {
            return;
        }
        self.count -= n;
        self.start = (self.start + n) % self.capacity;
        if self.count == 1 {
            // Whatever survived is the newest point; it stays even if it
            // was provisional, so the next add starts from it.
            self.temp_last = false;
        }
    }
}

//! DTS estimation for PTS-only ingest
//!
//! RTP and annex-B publishers carry presentation timestamps only. Until a
//! B-frame shows up (a PTS lower than its predecessor) decode order equals
//! presentation order and DTS is the PTS. Afterwards the decoder lags by the
//! reorder depth, so DTS is the smallest PTS in a small sorted window.
//!
//! All values are 90 kHz ticks and compared modulo 2^32.

/// Window depth; covers two levels of B-frame pyramids
const WINDOW: usize = 4;

#[derive(Debug, Clone)]
enum State {
    Warmup,
    Active {
        prev_pts: u32,
        prev_dts: u32,
        has_b_frames: bool,
        /// Largest PTS values seen, descending, newest appended
        window: Vec<u32>,
    },
}

/// Two-state decode-timestamp estimator
#[derive(Debug, Clone)]
pub struct DtsEstimator {
    state: State,
}

/// `a` precedes `b` in wrapping 32-bit time
fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

impl DtsEstimator {
    pub fn new() -> Self {
        Self {
            state: State::Warmup,
        }
    }

    /// Feed the next PTS in decode (arrival) order, returning its DTS
    pub fn feed(&mut self, pts: u32) -> u32 {
        match &mut self.state {
            State::Warmup => {
                self.state = State::Active {
                    prev_pts: pts,
                    prev_dts: pts,
                    has_b_frames: false,
                    window: vec![pts],
                };
                pts
            }
            State::Active {
                prev_pts,
                prev_dts,
                has_b_frames,
                window,
            } => {
                if before(pts, *prev_pts) {
                    if !*has_b_frames {
                        tracing::debug!(pts, prev_pts = *prev_pts, "B-frames detected");
                    }
                    *has_b_frames = true;
                }

                window.truncate(WINDOW - 1);
                window.push(pts);
                window.sort_by(|a, b| {
                    let ka = a.wrapping_sub(pts) as i32;
                    let kb = b.wrapping_sub(pts) as i32;
                    kb.cmp(&ka)
                });

                let mut dts = if *has_b_frames {
                    window.last().copied().unwrap_or(pts)
                } else {
                    pts
                };
                if !before(*prev_dts, dts) {
                    dts = prev_dts.wrapping_add(1);
                }

                *prev_pts = pts;
                *prev_dts = dts;
                dts
            }
        }
    }

    /// Whether a B-frame has been observed
    pub fn has_b_frames(&self) -> bool {
        matches!(self.state, State::Active { has_b_frames: true, .. })
    }

    /// Start over, e.g. after a publisher reconnect
    pub fn reset(&mut self) {
        self.state = State::Warmup;
    }
}

impl Default for DtsEstimator {
    fn default() -> Self {
        Self::new()
    }
}

//! Cookie activity classification for prerender statistics.

use std::time::SystemTime;

/// Number of distinct values [`CookieActivityRecorder::status`] can take.
pub const NUM_COOKIE_STATUSES: u8 = 1 << 4;

const MAIN_FRAME_SEND: u8 = 0;
const MAIN_FRAME_CHANGE: u8 = 1;
const OTHER_SEND: u8 = 2;
const OTHER_CHANGE: u8 = 3;

/// Cookie store interaction observed for a prerender's requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieEvent {
    Send,
    Change,
}

/// Accumulates a bitmask of the cookie interactions a prerender performed.
#[derive(Debug, Clone, Default)]
pub struct CookieActivityRecorder {
    status: u8,
    start_time: Option<SystemTime>,
}

impl CookieActivityRecorder {
    pub fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = Some(start_time);
    }

    /// Records one event. Sends only count for cookies that already existed
    /// when the prerender started; `earliest_create_date` is the oldest
    /// creation time among the cookies involved.
    pub fn record(
        &mut self,
        event: CookieEvent,
        is_main_frame_http_request: bool,
        earliest_create_date: SystemTime,
    ) {
        if event == CookieEvent::Send {
            match self.start_time {
                Some(start) if earliest_create_date <= start => {}
                _ => return,
            }
        }

        let bit = match (is_main_frame_http_request, event) {
            (true, CookieEvent::Send) => MAIN_FRAME_SEND,
            (true, CookieEvent::Change) => MAIN_FRAME_CHANGE,
            (false, CookieEvent::Send) => OTHER_SEND,
            (false, CookieEvent::Change) => OTHER_CHANGE,
        };
        self.status |= 1 << bit;
        debug_assert!(self.status < NUM_COOKIE_STATUSES);
    }

    pub fn status(&self) -> u8 {
        self.status
    }
}

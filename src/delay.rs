use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::timer::CountDown;
use embedded_time::duration::{Duration, Milliseconds};

use nb::block;

/// Adapts a HAL countdown timer into the blocking millisecond delay the
/// drivers take for settle times and wait budgets.
pub struct DelayTimer<CD>
where
    CD: CountDown,
    CD::Time: Duration + From<Milliseconds>,
{
    count_down: CD,
}

impl<CD> DelayTimer<CD>
where
    CD: CountDown,
    CD::Time: Duration + From<Milliseconds>,
{
    pub fn new(count_down: CD) -> Self {
        Self { count_down }
    }
}

impl<CD> DelayMs<u32> for DelayTimer<CD>
where
    CD: CountDown,
    CD::Time: Duration + From<Milliseconds>,
{
    fn delay_ms(&mut self, ms: u32) {
        let duration = Milliseconds(ms);
        self.count_down.start(duration);
        block!(self.count_down.wait()).ok();
    }
}

//! Double-click detection and launch throttling.
//!
//! Times are X server timestamps in milliseconds; they wrap at `u32::MAX`.

use tracing::debug;

use crate::config::Settings;

pub const DEFAULT_CLICK_DELAY: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickPolicy {
    /// Max gap between a release and the next press to count as a double click.
    pub click_delay: u32,
    /// Min gap between launches while the previous one is still starting.
    pub icon_start_delay: u32,
    /// Launch on a single press instead of a double click.
    pub one_click: bool,
}

impl Default for ClickPolicy {
    fn default() -> Self {
        Self {
            click_delay: DEFAULT_CLICK_DELAY,
            icon_start_delay: 0,
            one_click: false,
        }
    }
}

impl ClickPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        let click_delay = match settings.get_int("clickdelay") {
            n if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => DEFAULT_CLICK_DELAY,
        };
        Self {
            click_delay,
            icon_start_delay: u32::try_from(settings.get_int("iconstartdelay").max(0)).unwrap_or(u32::MAX),
            one_click: settings.get_bool("oneclick"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickDecision {
    /// Not a launching click.
    Ignore,
    /// A launching click arrived while the previous launch is still in flight.
    Throttled,
    Launch,
}

/// Shared by every icon: one debounce for the whole desktop.
#[derive(Debug, Clone, Default)]
pub struct ClickArbiter {
    policy: ClickPolicy,
    last_release: Option<u32>,
    last_launch: u32,
    in_flight: bool,
}

impl ClickArbiter {
    pub fn new(policy: ClickPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> ClickPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ClickPolicy) {
        self.policy = policy;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn on_release(&mut self, time: u32) {
        self.last_release = Some(time);
    }

    pub fn on_press(&mut self, time: u32) -> ClickDecision {
        let double = self
            .last_release
            .is_some_and(|r| time.wrapping_sub(r) < self.policy.click_delay);

        if double == self.policy.one_click {
            return ClickDecision::Ignore;
        }

        if self.in_flight && time.wrapping_sub(self.last_launch) < self.policy.icon_start_delay {
            debug!(
                since_last = time.wrapping_sub(self.last_launch),
                icon_start_delay = self.policy.icon_start_delay,
                "launch request too fast"
            );
            return ClickDecision::Throttled;
        }

        self.last_launch = time;
        self.in_flight = false;
        ClickDecision::Launch
    }

    /// Record whether the spawn after a `Launch` decision succeeded.
    pub fn launch_started(&mut self, ok: bool) {
        self.in_flight = ok;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter(one_click: bool, icon_start_delay: u32) -> ClickArbiter {
        ClickArbiter::new(ClickPolicy {
            click_delay: 500,
            icon_start_delay,
            one_click,
        })
    }

    #[test]
    fn single_press_is_ignored_in_double_click_mode() {
        let mut a = arbiter(false, 0);
        assert_eq!(a.on_press(1000), ClickDecision::Ignore);
    }

    #[test]
    fn press_within_delay_of_release_launches() {
        let mut a = arbiter(false, 0);
        a.on_press(1000);
        a.on_release(1050);
        assert_eq!(a.on_press(1300), ClickDecision::Launch);
    }

    #[test]
    fn slow_second_click_is_not_a_double() {
        let mut a = arbiter(false, 0);
        a.on_release(1000);
        assert_eq!(a.on_press(1500), ClickDecision::Ignore);
    }

    #[test]
    fn one_click_launches_on_first_press_and_ignores_the_double() {
        let mut a = arbiter(true, 0);
        assert_eq!(a.on_press(1000), ClickDecision::Launch);
        a.launch_started(true);
        a.on_release(1050);
        assert_eq!(a.on_press(1200), ClickDecision::Ignore);
    }

    #[test]
    fn in_flight_launch_throttles_until_start_delay_passes() {
        let mut a = arbiter(true, 3000);
        assert_eq!(a.on_press(10_000), ClickDecision::Launch);
        a.launch_started(true);
        a.on_release(10_100);
        assert_eq!(a.on_press(12_000), ClickDecision::Throttled);
        a.on_release(12_100);
        assert_eq!(a.on_press(13_500), ClickDecision::Launch);
    }

    #[test]
    fn failed_spawn_does_not_throttle() {
        let mut a = arbiter(true, 3000);
        assert_eq!(a.on_press(10_000), ClickDecision::Launch);
        a.launch_started(false);
        a.on_release(10_100);
        assert_eq!(a.on_press(11_000), ClickDecision::Launch);
    }

    #[test]
    fn oversized_delays_saturate() {
        let policy = ClickPolicy::from_settings(&Settings::parse(
            "ClickDelay: 5000000000\nIconStartDelay: 5000000000\n",
        ));
        assert_eq!(policy.click_delay, u32::MAX);
        assert_eq!(policy.icon_start_delay, u32::MAX);
    }

    #[test]
    fn timestamps_wrap_around() {
        let mut a = arbiter(false, 0);
        a.on_release(u32::MAX - 100);
        assert_eq!(a.on_press(100), ClickDecision::Launch);
    }

    #[test]
    fn policy_reads_settings_with_defaults() {
        let p = ClickPolicy::from_settings(&Settings::parse("OneClick: true\nIconStartDelay: 5000\n"));
        assert_eq!(p.click_delay, DEFAULT_CLICK_DELAY);
        assert_eq!(p.icon_start_delay, 5000);
        assert!(p.one_click);
    }
}

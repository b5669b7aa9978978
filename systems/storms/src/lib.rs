#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Lifecycle machine tracking emergent, reinforcing storms.
//!
//! | From | Condition | To |
//! |---|---|---|
//! | (none) | first input for an id | forming |
//! | any | input for the id this tick | reinforced, `intensity = max(old * 0.8, new)` |
//! | forming | reinforced above `0.6` | active |
//! | dissipating | reinforced | active |
//! | forming | intensity `< 0.2` and unsupported for `> 4 s` | removed |
//! | active | unsupported for `> 3 s` | dissipating |
//! | dissipating | unsupported tick | `intensity *= 1 - min(1, dt / 2 s)` |
//! | dissipating | intensity `< 0.1` | removed |
//! | any | older than the ttl | removed |
//!
//! Every threshold is policy carried by [`Config`].

use std::{collections::BTreeMap, time::Duration};

use crowd_field_core::{EntityId, Storm, StormEvent, StormInput, StormRemoval, StormState};

/// Thresholds and windows driving storm transitions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    /// Lifetime after which a storm is removed regardless of support.
    pub ttl: Duration,
    /// Intensity a forming storm must exceed when reinforced to become active.
    pub activation_intensity: f32,
    /// Intensity below which an unsupported forming storm may be dropped.
    pub forming_floor: f32,
    /// Time without support after which a weak forming storm is dropped.
    pub forming_grace: Duration,
    /// Time without support after which an active storm starts dissipating.
    pub active_grace: Duration,
    /// Window over which a dissipating storm would lose all of its intensity.
    pub dissipation_window: Duration,
    /// Intensity below which a dissipating storm is removed.
    pub removal_floor: f32,
    /// Fraction of the current intensity kept when a storm is reinforced.
    pub reinforcement_retention: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(20),
            activation_intensity: 0.6,
            forming_floor: 0.2,
            forming_grace: Duration::from_secs(4),
            active_grace: Duration::from_secs(3),
            dissipation_window: Duration::from_secs(2),
            removal_floor: 0.1,
            reinforcement_retention: 0.8,
        }
    }
}

/// Storm lifecycle machine that exclusively owns the storms it tracks.
#[derive(Debug, Default)]
pub struct StormMachine {
    config: Config,
    clock_ms: u64,
    tracked: BTreeMap<EntityId, Tracked>,
    alive: Vec<Storm>,
}

#[derive(Clone, Debug)]
struct Tracked {
    storm: Storm,
    supported: bool,
}

impl StormMachine {
    /// Creates an empty machine using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Milliseconds accumulated from every `dt` passed to [`StormMachine::update`].
    #[must_use]
    pub const fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Storms alive after the most recent update, sorted by identifier.
    #[must_use]
    pub fn storms(&self) -> &[Storm] {
        &self.alive
    }

    /// Looks up a live storm.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Storm> {
        self.tracked.get(id).map(|tracked| &tracked.storm)
    }

    /// Advances every storm by `dt`, applying this tick's inputs first.
    ///
    /// Transitions are appended to `events`. Returns the storms still alive,
    /// sorted by identifier.
    pub fn update(
        &mut self,
        inputs: &[StormInput],
        dt: Duration,
        events: &mut Vec<StormEvent>,
    ) -> &[Storm] {
        let dt_ms = u64::try_from(dt.as_millis()).unwrap_or(u64::MAX);
        self.clock_ms = self.clock_ms.saturating_add(dt_ms);

        for tracked in self.tracked.values_mut() {
            tracked.supported = false;
        }

        for input in inputs {
            if !input.intensity.is_finite() || !input.position.is_finite() {
                continue;
            }
            self.apply_input(input, events);
        }

        let config = self.config;
        let clock_ms = self.clock_ms;
        self.tracked.retain(|id, tracked| {
            let removal = advance(tracked, &config, dt_ms, clock_ms, events);
            match removal {
                Some(reason) => {
                    record(
                        events,
                        StormEvent::Removed {
                            id: id.clone(),
                            reason,
                        },
                    );
                    false
                }
                None => true,
            }
        });

        self.alive.clear();
        self.alive
            .extend(self.tracked.values().map(|tracked| tracked.storm.clone()));
        &self.alive
    }

    /// Drops every storm without emitting events.
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.alive.clear();
    }

    fn apply_input(&mut self, input: &StormInput, events: &mut Vec<StormEvent>) {
        let intensity = input.intensity.clamp(0.0, 1.0);

        if let Some(tracked) = self.tracked.get_mut(&input.id) {
            tracked.supported = true;
            let storm = &mut tracked.storm;
            storm.intensity = (storm.intensity * self.config.reinforcement_retention)
                .max(intensity)
                .clamp(0.0, 1.0);
            storm.position = input.position;
            storm.cohort = input.cohort;
            storm.last_support_ms = 0;

            let promote = match storm.state {
                StormState::Forming => storm.intensity > self.config.activation_intensity,
                StormState::Dissipating => true,
                StormState::Active => false,
            };
            if promote {
                storm.state = StormState::Active;
                record(
                    events,
                    StormEvent::Activated {
                        id: input.id.clone(),
                    },
                );
            }
            return;
        }

        let storm = Storm {
            id: input.id.clone(),
            position: input.position,
            intensity,
            state: StormState::Forming,
            born_ms: self.clock_ms,
            ttl_ms: u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX),
            last_support_ms: 0,
            cohort: input.cohort,
        };
        let _ = self.tracked.insert(
            input.id.clone(),
            Tracked {
                storm,
                supported: true,
            },
        );
        record(
            events,
            StormEvent::Formed {
                id: input.id.clone(),
            },
        );
    }
}

fn advance(
    tracked: &mut Tracked,
    config: &Config,
    dt_ms: u64,
    clock_ms: u64,
    events: &mut Vec<StormEvent>,
) -> Option<StormRemoval> {
    let storm = &mut tracked.storm;

    if !tracked.supported {
        storm.last_support_ms = storm.last_support_ms.saturating_add(dt_ms);

        match storm.state {
            StormState::Forming => {
                if storm.intensity < config.forming_floor
                    && storm.last_support_ms > duration_ms(config.forming_grace)
                {
                    return Some(StormRemoval::Stillborn);
                }
            }
            StormState::Active => {
                if storm.last_support_ms > duration_ms(config.active_grace) {
                    storm.state = StormState::Dissipating;
                    record(
                        events,
                        StormEvent::Dissipating {
                            id: storm.id.clone(),
                        },
                    );
                }
            }
            StormState::Dissipating => {
                storm.intensity *= 1.0 - dissipation_step(dt_ms, config.dissipation_window);
                if storm.intensity < config.removal_floor {
                    return Some(StormRemoval::Faded);
                }
            }
        }
    }

    if clock_ms.saturating_sub(storm.born_ms) > storm.ttl_ms {
        return Some(StormRemoval::Expired);
    }

    None
}

/// Fraction of intensity a dissipating storm loses over `dt_ms`.
#[must_use]
pub fn dissipation_step(dt_ms: u64, window: Duration) -> f32 {
    let window_ms = duration_ms(window);
    if window_ms == 0 {
        return 1.0;
    }
    (dt_ms as f32 / window_ms as f32).min(1.0)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn record(events: &mut Vec<StormEvent>, event: StormEvent) {
    log::debug!("storm transition: {event:?}");
    events.push(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dissipation_step_scales_with_delta() {
        let window = Duration::from_secs(2);
        assert!((dissipation_step(16, window) - 0.008).abs() < 1e-6);
        assert_eq!(dissipation_step(5_000, window), 1.0);
        assert_eq!(dissipation_step(16, Duration::ZERO), 1.0);
    }

    #[test]
    fn supported_flags_reset_every_tick() {
        let mut machine = StormMachine::new(Config::default());
        let mut events = Vec::new();
        let input = StormInput {
            id: EntityId::new("s"),
            position: glam::Vec2::ZERO,
            intensity: 0.5,
            cohort: 6,
        };

        let _ = machine.update(&[input], Duration::from_millis(16), &mut events);
        assert!(machine.tracked["s"].supported);

        let _ = machine.update(&[], Duration::from_millis(16), &mut events);
        assert!(!machine.tracked["s"].supported);
        assert_eq!(machine.tracked["s"].storm.last_support_ms, 16);
    }
}

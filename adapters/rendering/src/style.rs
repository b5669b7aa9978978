use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use crowd_field_core::{OverlayControls, OverlayControlsPatch};

use crate::Color;

type Listener = Rc<dyn Fn(&OverlayControls)>;

/// Identifier returned by [`StyleBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct StyleState {
    controls: Option<OverlayControls>,
    listeners: BTreeMap<SubscriptionId, Listener>,
    next_subscription: u64,
}

impl StyleState {
    fn controls_mut(&mut self) -> &mut OverlayControls {
        self.controls.get_or_insert_with(OverlayControls::default)
    }
}

/// Per-scene overlay controls with change notification.
///
/// Cloning the bus yields another handle to the same state, so every
/// renderer of a scene observes the same controls. Listeners run after the
/// state is updated and may read the bus again.
#[derive(Clone, Default)]
pub struct StyleBus {
    state: Rc<RefCell<StyleState>>,
}

impl StyleBus {
    /// Creates a bus whose controls are initialised on first access.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current controls.
    #[must_use]
    pub fn overlay_controls(&self) -> OverlayControls {
        self.state.borrow_mut().controls_mut().clone()
    }

    /// Merges `patch` into the controls, notifies listeners and returns the
    /// resulting snapshot.
    pub fn set_overlay_controls(&self, patch: OverlayControlsPatch) -> OverlayControls {
        let (snapshot, listeners) = {
            let mut state = self.state.borrow_mut();
            state.controls_mut().merge(patch);
            let snapshot = state.controls_mut().clone();
            let listeners: Vec<Listener> = state.listeners.values().cloned().collect();
            (snapshot, listeners)
        };
        for listener in listeners {
            listener(&snapshot);
        }
        snapshot
    }

    /// Registers a listener invoked after every change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&OverlayControls) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        let _ = state.listeners.insert(id, Rc::new(listener));
        id
    }

    /// Removes a listener; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.borrow_mut().listeners.remove(&id).is_some()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    /// Applies the current controls to an overlay colour.
    #[must_use]
    pub fn style(&self, color: Color) -> Color {
        let mut state = self.state.borrow_mut();
        styled(state.controls_mut(), color)
    }
}

impl fmt::Debug for StyleBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("StyleBus")
            .field("controls", &state.controls)
            .field("subscribers", &state.listeners.len())
            .finish()
    }
}

/// Applies `controls` to an overlay colour.
///
/// Monochrome wins over colorize; with colorize off the colour collapses to
/// its luma. Dimming only scales the opacity.
#[must_use]
pub fn styled(controls: &OverlayControls, color: Color) -> Color {
    let mut styled = if controls.monochrome {
        let token = controls.monochrome_token;
        Color::from_rgb_u8(token.red(), token.green(), token.blue()).with_alpha(color.alpha)
    } else if !controls.colorize {
        let luma = 0.299 * color.red + 0.587 * color.green + 0.114 * color.blue;
        Color::new(luma, luma, luma, color.alpha)
    } else {
        color
    };
    if controls.dim {
        styled.alpha *= controls.dim_factor;
    }
    styled
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crowd_field_core::Rgb;

    use super::*;

    #[test]
    fn clones_share_state() {
        let bus = StyleBus::new();
        let other = bus.clone();

        let _ = bus.set_overlay_controls(OverlayControlsPatch {
            dim: Some(true),
            ..OverlayControlsPatch::default()
        });

        assert!(other.overlay_controls().dim);
    }

    #[test]
    fn listeners_observe_merged_controls_and_can_unsubscribe() {
        let bus = StyleBus::new();
        let seen = Rc::new(Cell::new(0_u32));
        let observed = Rc::clone(&seen);
        let reader = bus.clone();
        let id = bus.subscribe(move |controls| {
            assert!(controls.monochrome);
            assert!(reader.overlay_controls().monochrome);
            observed.set(observed.get() + 1);
        });

        let _ = bus.set_overlay_controls(OverlayControlsPatch {
            monochrome: Some(true),
            ..OverlayControlsPatch::default()
        });
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        let _ = bus.set_overlay_controls(OverlayControlsPatch::default());

        assert_eq!(seen.get(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn styling_follows_controls() {
        let base = Color::new(1.0, 0.0, 0.0, 0.8);
        let mut controls = OverlayControls::default();
        assert_eq!(styled(&controls, base), base);

        controls.monochrome = true;
        controls.monochrome_token = Rgb::from_rgb(0, 0, 255);
        assert_eq!(styled(&controls, base), Color::new(0.0, 0.0, 1.0, 0.8));

        controls.monochrome = false;
        controls.colorize = false;
        controls.dim = true;
        controls.dim_factor = 0.5;
        let gray = styled(&controls, base);
        assert!((gray.red - 0.299).abs() < 1e-6);
        assert_eq!(gray.red, gray.blue);
        assert!((gray.alpha - 0.4).abs() < 1e-6);
    }
}

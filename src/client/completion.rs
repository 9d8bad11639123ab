//! Idempotent completion side-effect pipeline
//!
//! Two producers feed it: the local countdown reaching zero and the server's
//! `completed` event. Whichever arrives first runs the effects; the other is
//! absorbed by the per-instance guard.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

/// Vibration pattern in milliseconds (on, off, on, ...)
pub const COMPLETION_VIBRATION: &[u64] = &[200, 100, 200];

/// Sound played when a focus block ends
pub const COMPLETION_SOUND: &str = "focus-complete";

/// Where a completion trigger came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    LocalZeroCrossing,
    RemoteCompleted,
}

/// What a trigger did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Fired,
    AlreadyFired,
    /// The trigger names an instance other than the armed one
    Stale,
}

/// Platform effects run on completion.
///
/// Every method is best effort; an `Err` is logged and the sequence goes on.
pub trait CompletionEffects: Send + Sync {
    fn play_sound(&self, name: &str) -> Result<(), String>;
    fn vibrate(&self, pattern: &[u64]) -> Result<(), String>;
    fn focus_window(&self) -> Result<(), String>;
    fn notify(&self, title: &str, body: &str) -> Result<(), String>;
    fn enter_break_screen(&self) -> Result<(), String>;
}

/// Effects that only log, for headless hosts
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEffects;

impl CompletionEffects for LogEffects {
    fn play_sound(&self, name: &str) -> Result<(), String> {
        info!("Playing sound {}", name);
        Ok(())
    }

    fn vibrate(&self, pattern: &[u64]) -> Result<(), String> {
        debug!("Vibration pattern {:?} requested", pattern);
        Err("vibration is not available on this host".to_string())
    }

    fn focus_window(&self) -> Result<(), String> {
        debug!("Focus requested");
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        info!("Notification: {} - {}", title, body);
        Ok(())
    }

    fn enter_break_screen(&self) -> Result<(), String> {
        info!("Break time");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Guard {
    armed: Option<String>,
    fired: bool,
}

/// Runs the completion effects at most once per armed instance
#[derive(Clone)]
pub struct CompletionPipeline {
    effects: Arc<dyn CompletionEffects>,
    guard: Arc<Mutex<Guard>>,
}

impl std::fmt::Debug for CompletionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPipeline")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl CompletionPipeline {
    pub fn new(effects: Arc<dyn CompletionEffects>) -> Self {
        Self {
            effects,
            guard: Arc::new(Mutex::new(Guard::default())),
        }
    }

    /// Arm for a new timer instance, clearing the guard.
    ///
    /// Call on a new subtask or an explicit restart, never on pause/resume.
    pub fn arm(&self, instance_key: &str) {
        let mut guard = match self.guard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Completion armed for {}", instance_key);
        guard.armed = Some(instance_key.to_string());
        guard.fired = false;
    }

    /// Disarm without firing (timer stopped)
    pub fn disarm(&self) {
        let mut guard = match self.guard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.armed = None;
        guard.fired = false;
    }

    /// Whether the armed instance already completed
    pub fn has_fired(&self) -> bool {
        self.guard.lock().map(|g| g.fired).unwrap_or(true)
    }

    /// Fire the effects for `instance_key` unless already done
    pub fn trigger(
        &self,
        instance_key: &str,
        source: CompletionSource,
        subtask_title: &str,
    ) -> CompletionOutcome {
        {
            let mut guard = match self.guard.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.armed.as_deref() != Some(instance_key) {
                debug!("Ignoring {:?} completion for unarmed {}", source, instance_key);
                return CompletionOutcome::Stale;
            }
            if guard.fired {
                debug!("Completion for {} already handled, ignoring {:?}", instance_key, source);
                return CompletionOutcome::AlreadyFired;
            }
            guard.fired = true;
        }

        info!("Focus block {} complete via {:?}", instance_key, source);
        self.run_effects(subtask_title);
        CompletionOutcome::Fired
    }

    fn run_effects(&self, subtask_title: &str) {
        let body = if subtask_title.is_empty() {
            "Time for a break.".to_string()
        } else {
            format!("Finished \"{}\". Time for a break.", subtask_title)
        };

        let steps: [(&str, Result<(), String>); 5] = [
            ("sound", self.effects.play_sound(COMPLETION_SOUND)),
            ("vibration", self.effects.vibrate(COMPLETION_VIBRATION)),
            ("focus", self.effects.focus_window()),
            ("notification", self.effects.notify("Focus session complete", &body)),
            ("break screen", self.effects.enter_break_screen()),
        ];
        for (name, result) in steps {
            if let Err(e) = result {
                warn!("Completion {} effect failed: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts every effect call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingEffects {
        pub sounds: AtomicUsize,
        pub vibrations: AtomicUsize,
        pub focuses: AtomicUsize,
        pub notifications: AtomicUsize,
        pub breaks: AtomicUsize,
    }

    impl RecordingEffects {
        pub(crate) fn breaks(&self) -> usize {
            self.breaks.load(Ordering::SeqCst)
        }
    }

    impl CompletionEffects for RecordingEffects {
        fn play_sound(&self, _name: &str) -> Result<(), String> {
            self.sounds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn vibrate(&self, _pattern: &[u64]) -> Result<(), String> {
            self.vibrations.fetch_add(1, Ordering::SeqCst);
            Err("no motor".to_string())
        }

        fn focus_window(&self) -> Result<(), String> {
            self.focuses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn notify(&self, _title: &str, _body: &str) -> Result<(), String> {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn enter_break_screen(&self) -> Result<(), String> {
            self.breaks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn both_triggers_fire_effects_once() {
        let effects = Arc::new(RecordingEffects::default());
        let pipeline = CompletionPipeline::new(effects.clone());
        pipeline.arm("sub-1");

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(pipeline.trigger("sub-1", CompletionSource::LocalZeroCrossing, "Write"));
            outcomes.push(pipeline.trigger("sub-1", CompletionSource::RemoteCompleted, "Write"));
        }

        assert_eq!(outcomes[0], CompletionOutcome::Fired);
        assert!(outcomes[1..].iter().all(|o| *o == CompletionOutcome::AlreadyFired));
        // A failing vibration does not stop the rest of the sequence
        assert_eq!(effects.vibrations.load(Ordering::SeqCst), 1);
        assert_eq!(effects.notifications.load(Ordering::SeqCst), 1);
        assert_eq!(effects.breaks(), 1);
    }

    #[test]
    fn concurrent_triggers_fire_once() {
        let effects = Arc::new(RecordingEffects::default());
        let pipeline = CompletionPipeline::new(effects.clone());
        pipeline.arm("sub-1");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    let source = if i % 2 == 0 {
                        CompletionSource::LocalZeroCrossing
                    } else {
                        CompletionSource::RemoteCompleted
                    };
                    pipeline.trigger("sub-1", source, "")
                })
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == CompletionOutcome::Fired)
            .count();

        assert_eq!(fired, 1);
        assert_eq!(effects.sounds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rearming_allows_the_next_instance() {
        let effects = Arc::new(RecordingEffects::default());
        let pipeline = CompletionPipeline::new(effects.clone());
        pipeline.arm("a");
        pipeline.trigger("a", CompletionSource::RemoteCompleted, "");
        assert_eq!(
            pipeline.trigger("b", CompletionSource::RemoteCompleted, ""),
            CompletionOutcome::Stale
        );

        pipeline.arm("b");
        assert!(!pipeline.has_fired());
        assert_eq!(
            pipeline.trigger("b", CompletionSource::LocalZeroCrossing, ""),
            CompletionOutcome::Fired
        );
        assert_eq!(effects.breaks(), 2);
    }

    #[test]
    fn disarmed_pipeline_ignores_triggers() {
        let effects = Arc::new(RecordingEffects::default());
        let pipeline = CompletionPipeline::new(effects.clone());
        pipeline.arm("a");
        pipeline.disarm();
        assert_eq!(
            pipeline.trigger("a", CompletionSource::RemoteCompleted, ""),
            CompletionOutcome::Stale
        );
        assert_eq!(effects.breaks(), 0);
    }
}

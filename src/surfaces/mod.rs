//! Presentation surfaces
//!
//! Surfaces only render the [`TimerView`] published by a session. Each runs
//! its own render loop, and closing one leaves the others and the timer alone.
//! Platform capability checks (overlay install probing, picture-in-picture
//! media) live behind traits in the submodules.

pub mod overlay;
pub mod pip;
pub mod widget;

use std::time::Duration;

use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{client::TimerView, error::SurfaceError};

pub use overlay::{OverlayLaunch, OverlayWindow};
pub use pip::PipSurface;
pub use widget::WidgetSurface;

/// A renderer of timer state
pub trait Surface: Send + 'static {
    fn name(&self) -> &'static str;

    fn render(&mut self, view: &TimerView) -> Result<(), SurfaceError>;

    /// `Some` for surfaces animated at a fixed rate, `None` to render on change
    fn frame_interval(&self) -> Option<Duration> {
        None
    }

    /// Release whatever the surface created
    fn close(&mut self) {}
}

/// Running render loop for one surface
#[derive(Debug)]
pub struct SurfaceHandle {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SurfaceHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_open(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop this surface's render loop and release its resources
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Surface {} render loop ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start rendering `surface` from `views` until closed.
///
/// A render error ends only this surface.
pub fn open_surface<S: Surface>(mut surface: S, mut views: watch::Receiver<TimerView>) -> SurfaceHandle {
    let name = surface.name();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!("Opened {} surface", name);
        let initial = views.borrow_and_update().clone();
        if let Err(e) = surface.render(&initial) {
            warn!("{} surface failed to render: {}", name, e);
            surface.close();
            return;
        }

        let mut frames = surface.frame_interval().map(|period| {
            let mut frames = interval(period);
            frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
            frames
        });
        let on_change = frames.is_none();

        loop {
            let view = tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = next_frame(&mut frames) => views.borrow().clone(),
                changed = views.changed(), if on_change => {
                    if changed.is_err() {
                        debug!("Timer view closed, stopping {} surface", name);
                        break;
                    }
                    views.borrow_and_update().clone()
                }
            };
            if let Err(e) = surface.render(&view) {
                warn!("{} surface failed to render: {}", name, e);
                break;
            }
        }

        surface.close();
        info!("Closed {} surface", name);
    });

    SurfaceHandle {
        name,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

async fn next_frame(frames: &mut Option<tokio::time::Interval>) {
    match frames {
        Some(frames) => {
            frames.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        renders: Arc<Mutex<Vec<TimerView>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Surface for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn render(&mut self, view: &TimerView) -> Result<(), SurfaceError> {
            self.renders.lock().unwrap().push(view.clone());
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn surfaces_close_independently() {
        let (tx, rx) = watch::channel(TimerView::default());
        let first = Recorder::default();
        let second = Recorder::default();
        let first_handle = open_surface(first.clone(), rx.clone());
        let second_handle = open_surface(second.clone(), rx);

        tokio::task::yield_now().await;
        first_handle.close().await;
        assert!(*first.closed.lock().unwrap());

        tx.send(TimerView {
            time_left_ms: 1_000,
            is_running: true,
            ..Default::default()
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(second_handle.is_open());
        assert!(!*second.closed.lock().unwrap());
        let renders = second.renders.lock().unwrap().clone();
        assert_eq!(renders.last().map(|v| v.time_left_ms), Some(1_000));
        second_handle.close().await;
    }

    #[tokio::test]
    async fn unsupported_surface_stops_alone() {
        struct Broken;
        impl Surface for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn render(&mut self, _view: &TimerView) -> Result<(), SurfaceError> {
                Err(SurfaceError::Unsupported("broken surface"))
            }
        }

        let (_tx, rx) = watch::channel(TimerView::default());
        let handle = open_surface(Broken, rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_open());
    }
}

//! The step stack and dispatch loop.
//!
//! A step is a value-typed record dispatched by tagged-variant matching:
//! it declares which event classes it wants plus a timeout, and its
//! `on_event` returns what the engine should do with the stack next. Steps
//! that launch full flows simply run them inline inside `on_event`; flow
//! code awaits the bus directly, exactly like the menus do, so the engine
//! only ever sees one logical operation at a time.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use vault_common::constants::{
    DEFAULT_INACTIVITY_TIMEOUT, STEP_STACK_CAPACITY,
};

use crate::{
    events::{Event, EventBus, EventClass},
    list::BoundedList,
};

/// What a step waits on.
#[derive(Clone, Copy, Debug)]
pub struct EventConfig {
    pub mask: EventClass,
    pub timeout: Duration,
}

impl EventConfig {
    pub fn new(mask: EventClass) -> Self {
        Self {
            mask,
            timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Contexts the engine can run against must at least expose the bus.
pub trait HasEventBus {
    fn event_bus(&mut self) -> &mut EventBus;
}

impl HasEventBus for EventBus {
    fn event_bus(&mut self) -> &mut EventBus {
        self
    }
}

/// What to do with the stack after an event was handled.
pub enum StepOutcome<Ctx> {
    /// Keep waiting on the same step.
    Stay,
    /// Push a child step; it becomes current.
    Push(Box<dyn Step<Ctx>>),
    /// Pop this step; the parent becomes current again.
    Pop,
    /// Swap this step out for another.
    Replace(Box<dyn Step<Ctx>>),
    /// Unwind the whole stack; the engine returns to its caller.
    PopAll,
}

/// One engine step: an event subscription plus its callbacks.
#[async_trait(?Send)]
pub trait Step<Ctx> {
    fn config(&self) -> EventConfig;

    /// Runs once, when the step first becomes current after a push.
    async fn on_enter(&mut self, _ctx: &mut Ctx) {}

    /// Handle the one event the bus returned. Unsubscribed classes can
    /// still show up here (P0 always can); returning `Stay` ignores them.
    async fn on_event(&mut self, ctx: &mut Ctx, event: Event)
        -> StepOutcome<Ctx>;
}

struct Slot<Ctx> {
    step: Box<dyn Step<Ctx>>,
    entered: bool,
}

/// The engine: a bounded stack of steps, dispatching one event per loop
/// iteration to the step on top.
pub struct Engine<Ctx> {
    stack: BoundedList<Slot<Ctx>, STEP_STACK_CAPACITY>,
}

impl<Ctx: HasEventBus> Engine<Ctx> {
    pub fn new() -> Self {
        Self {
            stack: BoundedList::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Push the step that becomes current on the next loop iteration.
    pub fn push(&mut self, step: Box<dyn Step<Ctx>>) {
        if self
            .stack
            .insert(Slot {
                step,
                entered: false,
            })
            .is_err()
        {
            // A step stack deeper than the engine allows is a firmware
            // bug; dropping the push is the safest observable behavior.
            warn!("step stack full, dropping push");
            return;
        }
        let _ = self.stack.seek_last();
    }

    fn pop(&mut self) {
        let _ = self.stack.delete_current();
        let _ = self.stack.seek_last();
    }

    /// Run until the stack is empty.
    pub async fn run(&mut self, ctx: &mut Ctx) {
        loop {
            let Ok(slot) = self.stack.current_mut() else {
                debug!("step stack empty, engine returning");
                return;
            };

            if !slot.entered {
                slot.entered = true;
                slot.step.on_enter(ctx).await;
            }

            let config = slot.step.config();
            let event =
                ctx.event_bus().get_events(config.mask, config.timeout).await;

            let Ok(slot) = self.stack.current_mut() else { return };
            let outcome = slot.step.on_event(ctx, event).await;

            match outcome {
                StepOutcome::Stay => {}
                StepOutcome::Push(step) => self.push(step),
                StepOutcome::Pop => self.pop(),
                StepOutcome::Replace(step) => {
                    self.pop();
                    self.push(step);
                }
                StepOutcome::PopAll => self.stack.clear(),
            }
        }
    }
}

impl<Ctx: HasEventBus> Default for Engine<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::events::{P0Event, UiEvent};

    /// A step that records events and follows a scripted outcome list.
    struct Scripted {
        name: &'static str,
        outcomes: Vec<fn() -> StepOutcome<TestCtx>>,
    }

    struct TestCtx {
        bus: EventBus,
        log: Vec<String>,
    }

    impl HasEventBus for TestCtx {
        fn event_bus(&mut self) -> &mut EventBus {
            &mut self.bus
        }
    }

    #[async_trait(?Send)]
    impl Step<TestCtx> for Scripted {
        fn config(&self) -> EventConfig {
            EventConfig::new(EventClass::UI)
                .with_timeout(Duration::from_secs(60))
        }

        async fn on_enter(&mut self, ctx: &mut TestCtx) {
            ctx.log.push(format!("enter {}", self.name));
        }

        async fn on_event(
            &mut self,
            ctx: &mut TestCtx,
            event: Event,
        ) -> StepOutcome<TestCtx> {
            match event {
                Event::P0(P0Event::InactivityTimeout) => {
                    ctx.log.push(format!("timeout {}", self.name));
                    return StepOutcome::PopAll;
                }
                _ => ctx.log.push(format!("event {}", self.name)),
            }
            if self.outcomes.is_empty() {
                StepOutcome::Stay
            } else {
                (self.outcomes.remove(0))()
            }
        }
    }

    fn ctx() -> TestCtx {
        TestCtx {
            bus: EventBus::new(),
            log: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enter_runs_once_then_pops() {
        let mut ctx = ctx();
        let tx = ctx.bus.senders();
        let mut engine = Engine::new();
        engine.push(Box::new(Scripted {
            name: "menu",
            outcomes: vec![|| StepOutcome::Stay, || StepOutcome::Pop],
        }));

        tx.ui(UiEvent::Confirm);
        tx.ui(UiEvent::Confirm);
        engine.run(&mut ctx).await;

        assert_eq!(
            ctx.log,
            vec!["enter menu", "event menu", "event menu"]
        );
        assert_eq!(engine.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_makes_child_current() {
        let mut ctx = ctx();
        let tx = ctx.bus.senders();
        let mut engine = Engine::new();
        engine.push(Box::new(Scripted {
            name: "parent",
            outcomes: vec![
                || {
                    StepOutcome::Push(Box::new(Scripted {
                        name: "child",
                        outcomes: vec![|| StepOutcome::Pop],
                    }))
                },
                || StepOutcome::Pop,
            ],
        }));

        for _ in 0..3 {
            tx.ui(UiEvent::Confirm);
        }
        engine.run(&mut ctx).await;

        assert_eq!(
            ctx.log,
            vec![
                "enter parent",
                "event parent",
                "enter child",
                "event child",
                "event parent",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replace_swaps_top() {
        let mut ctx = ctx();
        let tx = ctx.bus.senders();
        let mut engine = Engine::new();
        engine.push(Box::new(Scripted {
            name: "a",
            outcomes: vec![|| {
                StepOutcome::Replace(Box::new(Scripted {
                    name: "b",
                    outcomes: vec![|| StepOutcome::Pop],
                }))
            }],
        }));

        tx.ui(UiEvent::Confirm);
        tx.ui(UiEvent::Confirm);
        engine.run(&mut ctx).await;

        assert_eq!(
            ctx.log,
            vec!["enter a", "event a", "enter b", "event b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_unwinds_via_popall() {
        let mut ctx = ctx();
        let mut engine = Engine::new();
        engine.push(Box::new(Scripted {
            name: "menu",
            outcomes: vec![],
        }));

        // No events at all: the step's 60s budget expires.
        engine.run(&mut ctx).await;
        assert_eq!(ctx.log, vec!["enter menu", "timeout menu"]);
        assert_eq!(engine.depth(), 0);
    }
}

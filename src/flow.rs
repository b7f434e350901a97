//! Application shell and game-state stack.
//!
//! A "game state" is one screen of the application (menu, level, pause
//! overlay). [`App`] keeps a stack of them; only the top state receives
//! input, updates, ticks and render callbacks. Every hook returns an [`Out`]
//! telling the app how the stack should change.
//!
//! # Frame lifecycle
//!
//! [`App::run_frame`] follows this pattern each frame:
//! 1. `on_tick` when `tick_duration_millis` has elapsed since the last tick
//! 2. `on_update` with the frame time
//! 3. scene update (animations, switches, LODs, bounds)
//! 4. cull into the render graph
//! 5. draw the render graph
//! 6. `on_render` for immediate draws on top of the scene
//! 7. post effects, then end of frame
//!
//! Input is delivered between frames through [`App::handle_event`]. A
//! [`InputEvent::ContextReset`] reloads every GPU object before the top state
//! sees it.

use instant::{Duration, Instant};

use crate::{api::GraphicsApi, context::Context, render::FrameStats};

/// What a lifecycle hook wants done with the state stack.
///
/// `Configure` runs a closure against the [`Context`] after the hook returned,
/// e.g. to change the tick period or post effects from within `on_event`.
///
/// `Empty` is the default output used when nothing has to change.
pub enum Out<A: GraphicsApi> {
    Push(Box<dyn GameState<A>>),
    Pop,
    Replace(Box<dyn GameState<A>>),
    Configure(Box<dyn FnOnce(&mut Context<A>)>),
    Quit,
    Empty,
}

impl<A: GraphicsApi> Default for Out<A> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<A: GraphicsApi> std::fmt::Debug for Out<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push(_) => f.write_str("Push(..)"),
            Self::Pop => f.write_str("Pop"),
            Self::Replace(_) => f.write_str("Replace(..)"),
            Self::Configure(_) => f.write_str("Configure(|&mut Context| -> {...})"),
            Self::Quit => f.write_str("Quit"),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Key { code: u32, pressed: bool },
    MouseMoved { x: f32, y: f32 },
    MouseButton { button: u8, pressed: bool },
    Resized { width: u32, height: u32 },
    /// The graphics context was lost and recreated; GPU objects are reloaded
    /// before the state sees this.
    ContextReset,
    CloseRequested,
}

/// One screen of the application.
///
/// # Lifecycle
///
/// 1. `on_init()` is called once when the state is pushed
/// 2. `on_event()` is called for each input event while the state is on top
/// 3. `on_update()` is called every frame
/// 4. `on_tick()` is called every `tick_duration_millis`
/// 5. `on_render()` is called after the scene was drawn
/// 6. `on_exit()` is called when the state leaves the stack
pub trait GameState<A: GraphicsApi> {
    /// Set up the scene, camera and assets this state needs.
    fn on_init(&mut self, _ctx: &mut Context<A>) -> Out<A> {
        Out::Empty
    }

    fn on_event(&mut self, _ctx: &mut Context<A>, _event: &InputEvent) -> Out<A> {
        Out::Empty
    }

    /// Called every frame with the elapsed time `dt`.
    fn on_update(&mut self, ctx: &mut Context<A>, dt: Duration) -> Out<A>;

    /// Discrete logic that does not need to run every frame.
    fn on_tick(&mut self, _ctx: &mut Context<A>) -> Out<A> {
        Out::Empty
    }

    /// Immediate draws over the scene, such as HUD quads. The material
    /// tracker is clear when this is called and must be left clear.
    fn on_render(&mut self, _ctx: &mut Context<A>) {}

    fn on_exit(&mut self, _ctx: &mut Context<A>) {}
}

pub struct App<A: GraphicsApi> {
    ctx: Context<A>,
    states: Vec<Box<dyn GameState<A>>>,
    time_since_tick: Duration,
    last_time: Instant,
    running: bool,
}

impl<A: GraphicsApi> App<A> {
    /// Pushes `initial` and runs its `on_init`.
    pub fn new(ctx: Context<A>, initial: Box<dyn GameState<A>>) -> Self {
        let mut app = Self {
            ctx,
            states: Vec::new(),
            time_since_tick: Duration::from_millis(0),
            last_time: Instant::now(),
            running: true,
        };
        app.handle_output(Out::Push(initial));
        app
    }

    pub fn context(&self) -> &Context<A> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context<A> {
        &mut self.ctx
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn handle_event(&mut self, event: InputEvent) {
        match &event {
            InputEvent::Resized { width, height } => self.ctx.resize(*width, *height),
            InputEvent::ContextReset => {
                let report = self.ctx.reload();
                if !report.is_clean() {
                    log::warn!("assets failed to reload: {:?}", report.failures);
                }
            }
            InputEvent::CloseRequested => {
                self.handle_output(Out::Quit);
                return;
            }
            _ => {}
        }
        let out = match self.states.last_mut() {
            Some(state) => state.on_event(&mut self.ctx, &event),
            None => return,
        };
        self.handle_output(out);
    }

    /// Runs one frame with the given frame time. A frame where the stack
    /// empties before anything is drawn returns empty statistics.
    pub fn run_frame(&mut self, dt: Duration) -> anyhow::Result<FrameStats> {
        self.time_since_tick += dt;
        if self.time_since_tick >= Duration::from_millis(self.ctx.config.tick_duration_millis) {
            if let Some(state) = self.states.last_mut() {
                let out = state.on_tick(&mut self.ctx);
                self.handle_output(out);
            }
            self.time_since_tick = Duration::from_millis(0);
        }
        if let Some(state) = self.states.last_mut() {
            let out = state.on_update(&mut self.ctx, dt);
            self.handle_output(out);
        }
        if !self.running {
            return Ok(FrameStats::default());
        }

        self.ctx.update_scene(dt);
        self.ctx.cull();
        self.ctx.draw_scene();
        if let Some(state) = self.states.last_mut() {
            state.on_render(&mut self.ctx);
        }
        self.ctx.finish_frame()
    }

    /// Drives frames until the state stack is empty. `poll` is asked for the
    /// input that arrived since the previous frame.
    pub fn run(&mut self, mut poll: impl FnMut() -> Vec<InputEvent>) -> anyhow::Result<()> {
        self.last_time = Instant::now();
        while self.running {
            for event in poll() {
                self.handle_event(event);
            }
            if !self.running {
                break;
            }
            let dt = self.last_time.elapsed();
            self.last_time = Instant::now();
            let stats = self.run_frame(dt)?;
            log::trace!("frame: {stats:?}");
        }
        Ok(())
    }

    fn handle_output(&mut self, out: Out<A>) {
        match out {
            Out::Push(state) => self.push(state),
            Out::Pop => {
                self.pop();
                if self.states.is_empty() {
                    self.running = false;
                }
            }
            Out::Replace(state) => {
                self.pop();
                self.push(state);
            }
            Out::Configure(f) => f(&mut self.ctx),
            Out::Quit => {
                while !self.states.is_empty() {
                    self.pop();
                }
                self.running = false;
            }
            Out::Empty => (),
        }
    }

    fn push(&mut self, mut state: Box<dyn GameState<A>>) {
        let out = state.on_init(&mut self.ctx);
        self.states.push(state);
        self.handle_output(out);
    }

    fn pop(&mut self) {
        if let Some(mut state) = self.states.pop() {
            state.on_exit(&mut self.ctx);
        }
    }
}

/// Initialises `env_logger` once; later calls only warn.
pub fn init_logging() {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}

//! Graphics context switching.
//!
//! The host application and the renderer each own a native graphics context.
//! Renderer work must run with the renderer context current and hand the host
//! its own context back afterwards. Switching nests: only the outermost
//! enter/leave pair actually swaps contexts.

use std::{cell::Cell, rc::Rc};

/// A native graphics context that can be made current on the calling thread.
pub trait GraphicsContext {
    fn make_current(&self);
}

/// Saves both contexts once at startup and swaps between them on demand.
#[derive(Default)]
pub struct ContextSwitcher {
    host: Option<Rc<dyn GraphicsContext>>,
    renderer: Option<Rc<dyn GraphicsContext>>,
    depth: Cell<u32>,
    swaps: Cell<u64>,
}

impl ContextSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_host_context(&mut self, ctx: Rc<dyn GraphicsContext>) {
        if self.host.is_some() {
            log::warn!("host graphics context was already saved, ignoring");
            return;
        }
        self.host = Some(ctx);
    }

    pub fn save_renderer_context(&mut self, ctx: Rc<dyn GraphicsContext>) {
        if self.renderer.is_some() {
            log::warn!("renderer graphics context was already saved, ignoring");
            return;
        }
        self.renderer = Some(ctx);
    }

    pub fn is_ready(&self) -> bool {
        self.host.is_some() && self.renderer.is_some()
    }

    /// Current nesting depth; 0 means the host context is active.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Number of real context swaps performed so far.
    pub fn swap_count(&self) -> u64 {
        self.swaps.get()
    }

    pub fn enter_renderer_context(&self) {
        let depth = self.depth.get();
        self.depth.set(depth + 1);
        if depth > 0 {
            return;
        }
        match &self.renderer {
            Some(renderer) if self.host.is_some() => {
                renderer.make_current();
                self.swaps.set(self.swaps.get() + 1);
            }
            _ => log::error!("entering renderer context before both contexts were saved"),
        }
    }

    pub fn leave_renderer_context(&self) {
        let depth = self.depth.get();
        if depth == 0 {
            log::error!("leaving renderer context without a matching enter");
            return;
        }
        self.depth.set(depth - 1);
        if depth > 1 {
            return;
        }
        match &self.host {
            Some(host) if self.renderer.is_some() => {
                host.make_current();
                self.swaps.set(self.swaps.get() + 1);
            }
            _ => log::error!("leaving renderer context before both contexts were saved"),
        }
    }

    /// Enters the renderer context until the returned guard is dropped.
    pub fn scope(&self) -> RendererContextGuard<'_> {
        self.enter_renderer_context();
        RendererContextGuard { switcher: self }
    }
}

/// Restores the host context (if outermost) when dropped.
pub struct RendererContextGuard<'a> {
    switcher: &'a ContextSwitcher,
}

impl Drop for RendererContextGuard<'_> {
    fn drop(&mut self) {
        self.switcher.leave_renderer_context();
    }
}

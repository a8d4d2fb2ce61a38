//! Spatial focus navigator
//!
//! Keeps a stack of isolated navigation contexts. Only the top context is live:
//! navigation, focus bookkeeping and pointer tracking all act on it, and
//! notifications about elements of lower contexts are ignored.
//!
//! Elements are identified by the host's [`ElementHandle`]; the grid keeps its
//! own side table from handle to [`NavigableId`] instead of tagging elements.

use super::geometry::{best_candidate, Direction, NavRect};
use super::rect_cache::{LayoutProvider, RectCache};
use super::ElementHandle;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Audio feedback the navigator asks the host to play
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoundCue {
    Switch,
}

/// What the navigator needs from the UI it drives
pub trait FocusHost: LayoutProvider {
    fn focus(&mut self, element: ElementHandle);
    fn blur(&mut self, element: ElementHandle);
    /// Visible screen area, used to skip off-screen elements for sequential focus
    fn viewport(&mut self) -> Option<NavRect> {
        None
    }
    fn play_cue(&mut self, _cue: SoundCue) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigableId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for NavigableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nav-{}", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NavigableOptions {
    /// Directions focus may leave through; empty means all four
    pub exit_directions: Vec<Direction>,
    pub autofocus: bool,
}

impl Default for NavigableOptions {
    fn default() -> Self {
        Self {
            exit_directions: Direction::ALL.to_vec(),
            autofocus: false,
        }
    }
}

impl NavigableOptions {
    pub fn autofocus() -> Self {
        Self {
            autofocus: true,
            ..Self::default()
        }
    }

    pub fn exits(directions: &[Direction]) -> Self {
        Self {
            exit_directions: directions.to_vec(),
            ..Self::default()
        }
    }
}

/// Returned by [`NavGrid::register`]; hand it back to [`NavGrid::unregister`].
/// A duplicate registration yields a no-op token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registration {
    element: ElementHandle,
    navigable: Option<NavigableId>,
}

impl Registration {
    pub fn element(&self) -> ElementHandle {
        self.element
    }

    pub fn navigable(&self) -> Option<NavigableId> {
        self.navigable
    }

    pub fn is_noop(&self) -> bool {
        self.navigable.is_none()
    }
}

#[derive(Clone, Debug)]
struct Navigable {
    id: NavigableId,
    element: ElementHandle,
    exit_directions: Vec<Direction>,
    autofocus: bool,
}

#[derive(Debug)]
struct NavContext {
    id: ContextId,
    /// Registration order
    navigables: Vec<Navigable>,
    active: Option<NavigableId>,
    mousing: Option<NavigableId>,
}

impl NavContext {
    fn new(id: ContextId) -> Self {
        Self {
            id,
            navigables: Vec::new(),
            active: None,
            mousing: None,
        }
    }

    fn get(&self, id: NavigableId) -> Option<&Navigable> {
        self.navigables.iter().find(|navigable| navigable.id == id)
    }

    fn element_of(&self, id: NavigableId) -> Option<ElementHandle> {
        self.get(id).map(|navigable| navigable.element)
    }

    fn first_autofocus(&self) -> Option<NavigableId> {
        self.navigables
            .iter()
            .find(|navigable| navigable.autofocus)
            .map(|navigable| navigable.id)
    }
}

#[derive(Clone, Copy, Debug)]
struct RegistryEntry {
    context: ContextId,
    navigable: NavigableId,
}

#[derive(Debug)]
pub struct NavGrid {
    stack: Vec<NavContext>,
    registry: HashMap<ElementHandle, RegistryEntry>,
    next_navigable: u64,
    next_context: u64,
}

impl Default for NavGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl NavGrid {
    pub fn new() -> Self {
        Self {
            stack: vec![NavContext::new(ContextId(0))],
            registry: HashMap::new(),
            next_navigable: 1,
            next_context: 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current_context(&self) -> ContextId {
        self.top().id
    }

    /// Number of navigables in the live context
    pub fn navigable_count(&self) -> usize {
        self.top().navigables.len()
    }

    pub fn is_registered(&self, element: ElementHandle) -> bool {
        self.registry.contains_key(&element)
    }

    fn top(&self) -> &NavContext {
        // the root context is never popped
        &self.stack[self.stack.len() - 1]
    }

    fn top_mut(&mut self) -> &mut NavContext {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    /// Top-context navigable for an element, if the element lives there
    fn live_navigable(&self, element: ElementHandle) -> Option<NavigableId> {
        let entry = self.registry.get(&element)?;
        (entry.context == self.top().id).then_some(entry.navigable)
    }

    /// New empty context on top; focus leaves the previous top
    pub fn push_context<H: FocusHost + ?Sized>(&mut self, host: &mut H) -> ContextId {
        let previous = self.top_mut();
        previous.mousing = None;
        if let Some(element) = previous.active.and_then(|id| previous.element_of(id)) {
            host.blur(element);
        }

        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.stack.push(NavContext::new(id));
        info!("Pushed navigation context {} (depth {})", id, self.stack.len());
        id
    }

    /// Discards the top context and restores focus in the one below it.
    /// A no-op returning `false` when only the root context is left.
    pub fn pop_context<H: FocusHost + ?Sized>(
        &mut self,
        host: &mut H,
        rects: &mut RectCache,
    ) -> bool {
        if self.stack.len() <= 1 {
            debug!("Ignoring pop of the root navigation context");
            return false;
        }
        let Some(popped) = self.stack.pop() else {
            return false;
        };
        for navigable in &popped.navigables {
            self.registry.remove(&navigable.element);
            rects.invalidate(navigable.element);
        }
        info!("Popped navigation context {} (depth {})", popped.id, self.stack.len());

        let top = self.top();
        if let Some(element) = top.active.and_then(|id| top.element_of(id)) {
            host.focus(element);
        } else if let Some(id) = top.first_autofocus() {
            self.focus_navigable(id, host);
        }
        true
    }

    /// Adds `element` to the live context
    pub fn register<H: FocusHost + ?Sized>(
        &mut self,
        element: ElementHandle,
        options: NavigableOptions,
        host: &mut H,
    ) -> Registration {
        if self.registry.contains_key(&element) {
            warn!("Navigable already registered: {:?}", element);
            return Registration {
                element,
                navigable: None,
            };
        }

        let id = NavigableId(self.next_navigable);
        self.next_navigable += 1;
        let exit_directions = if options.exit_directions.is_empty() {
            Direction::ALL.to_vec()
        } else {
            options.exit_directions
        };

        let context = self.top_mut();
        context.navigables.push(Navigable {
            id,
            element,
            exit_directions,
            autofocus: options.autofocus,
        });
        let context_id = context.id;
        let needs_focus = options.autofocus && context.active.is_none();
        self.registry.insert(
            element,
            RegistryEntry {
                context: context_id,
                navigable: id,
            },
        );
        debug!("Registered {} for {:?} in {}", id, element, context_id);

        if needs_focus {
            self.focus_navigable(id, host);
        }

        Registration {
            element,
            navigable: Some(id),
        }
    }

    /// Removes a registration from whichever context it was made in
    pub fn unregister(&mut self, registration: Registration, rects: &mut RectCache) {
        let Some(id) = registration.navigable else {
            return;
        };
        let element = registration.element;
        let owned = self
            .registry
            .get(&element)
            .is_some_and(|entry| entry.navigable == id);
        if !owned {
            return;
        }
        self.registry.remove(&element);
        rects.invalidate(element);

        for context in &mut self.stack {
            if let Some(index) = context.navigables.iter().position(|n| n.id == id) {
                context.navigables.remove(index);
                if context.active == Some(id) {
                    context.active = None;
                }
                if context.mousing == Some(id) {
                    context.mousing = None;
                }
                debug!("Unregistered {} from {}", id, context.id);
                break;
            }
        }
    }

    /// Moves focus one step in `direction`. Returns whether focus changed.
    pub fn navigate<H: FocusHost + ?Sized>(
        &mut self,
        direction: Direction,
        host: &mut H,
        rects: &mut RectCache,
        now: DateTime<Utc>,
    ) -> bool {
        let top = self.top();
        if top.navigables.is_empty() {
            return false;
        }

        let Some(active) = top.active.and_then(|id| top.get(id)) else {
            let target = top.first_autofocus().or_else(|| top.navigables.first().map(|n| n.id));
            return target.is_some_and(|id| self.focus_navigable(id, host));
        };

        if !active.exit_directions.contains(&direction) {
            debug!("{} cannot be left {:?}", active.id, direction);
            return false;
        }

        let source = (active.id, active.element);
        let others: Vec<(NavigableId, ElementHandle)> = top
            .navigables
            .iter()
            .filter(|navigable| navigable.id != source.0)
            .map(|navigable| (navigable.id, navigable.element))
            .collect();

        let from = rects.get_rect(source.1, &mut *host, now);
        let candidates: Vec<(NavigableId, NavRect)> = others
            .into_iter()
            .map(|(id, element)| (id, rects.get_rect(element, &mut *host, now)))
            .collect();

        match best_candidate(direction, &from, candidates) {
            Some(id) => self.focus_navigable(id, host),
            None => {
                debug!("No candidate {:?} of {}", direction, source.0);
                false
            }
        }
    }

    /// Sequential (Tab-order) focus over the live context's on-screen navigables
    pub fn move_focus<H: FocusHost + ?Sized>(
        &mut self,
        forward: bool,
        host: &mut H,
        rects: &mut RectCache,
        now: DateTime<Utc>,
    ) -> bool {
        let viewport = host.viewport();
        let top = self.top();
        let active = top.active;
        let ordered: Vec<(NavigableId, ElementHandle)> = top
            .navigables
            .iter()
            .map(|navigable| (navigable.id, navigable.element))
            .collect();

        let focusable: Vec<NavigableId> = ordered
            .into_iter()
            .filter(|(_, element)| match viewport {
                Some(viewport) => rects.get_rect(*element, &mut *host, now).intersects(&viewport),
                None => true,
            })
            .map(|(id, _)| id)
            .collect();
        if focusable.is_empty() {
            return false;
        }

        let last = focusable.len() - 1;
        let index = active.and_then(|id| focusable.iter().position(|candidate| *candidate == id));
        // nothing focused starts at the first element in either direction
        let next = match (index, forward) {
            (None, _) => 0,
            (Some(index), true) if index < last => index + 1,
            (Some(_), true) => 0,
            (Some(index), false) if index > 0 => index - 1,
            (Some(_), false) => last,
        };
        self.focus_navigable(focusable[next], host)
    }

    fn focus_navigable<H: FocusHost + ?Sized>(&mut self, id: NavigableId, host: &mut H) -> bool {
        let top = self.top();
        let Some(element) = top.element_of(id) else {
            return false;
        };
        let previous = top.active.and_then(|active| top.element_of(active));
        if previous == Some(element) {
            return false;
        }

        if let Some(previous) = previous {
            host.blur(previous);
        }
        host.focus(element);
        self.focus_changed(element, previous.is_some(), host);
        true
    }

    /// Focus landed on `element`; `from_other` tells whether focus moved from
    /// another element. Elements of non-live contexts are blurred again.
    pub fn focus_changed<H: FocusHost + ?Sized>(
        &mut self,
        element: ElementHandle,
        from_other: bool,
        host: &mut H,
    ) {
        let Some(id) = self.live_navigable(element) else {
            if self.registry.contains_key(&element) {
                host.blur(element);
            }
            return;
        };
        let context = self.top_mut();
        if from_other && context.mousing != Some(id) {
            host.play_cue(SoundCue::Switch);
        }
        context.active = Some(id);
    }

    pub fn blurred(&mut self, element: ElementHandle) {
        let Some(id) = self.live_navigable(element) else {
            return;
        };
        let context = self.top_mut();
        if context.active == Some(id) {
            context.active = None;
        }
    }

    pub fn pointer_down(&mut self, element: ElementHandle) {
        if let Some(id) = self.live_navigable(element) {
            self.top_mut().mousing = Some(id);
        }
    }

    pub fn pointer_up(&mut self, element: ElementHandle) {
        if let Some(id) = self.live_navigable(element) {
            let context = self.top_mut();
            if context.mousing == Some(id) {
                context.mousing = None;
            }
        }
    }

    /// Geometry of `element` changed
    pub fn resized(&self, element: ElementHandle, rects: &mut RectCache) {
        if self.registry.contains_key(&element) {
            rects.invalidate(element);
        }
    }

    pub fn active_element(&self) -> Option<ElementHandle> {
        let top = self.top();
        top.active.and_then(|id| top.element_of(id))
    }

    pub fn is_active_element(&self, element: ElementHandle) -> bool {
        self.active_element() == Some(element)
    }
}

//! `Composition`: the rendered output of one or more input sources, grounded
//! in `StreamComposition.h`/`StreamComposition.cpp`.
//!
//! Reuses `conduit_core::CompositionId` rather than redefining an identical
//! newtype -- the dispatcher and the composition both need to agree on the
//! same id type for `Dispatcher::create_composition`/`is_composition` to be
//! meaningful.

use conduit_core::CompositionId;

use crate::frame::Frame;
use crate::renderer::Renderer;
use crate::source::Source;

/// Invoked once per rendered output frame, mirroring
/// `StreamComposition::OutputCallback`.
pub type OutputCallback = Box<dyn Fn(&Frame) + Send>;

/// The rendered output of `N` input sources through one renderer.
///
/// All sources are assumed to start at time zero and advance in lockstep,
/// per the original's design note ("you always provide input frames in
/// lockstep").
pub struct Composition<Texture> {
    id: CompositionId,
    sources: Vec<Box<dyn Source>>,
    renderer: Box<dyn Renderer<Texture>>,
    output_callback: OutputCallback,
}

impl<Texture> Composition<Texture> {
    /// # Panics
    /// Panics if `sources` is empty, or if its length doesn't match
    /// `renderer.number_of_input_slots()`.
    pub fn new(
        id: CompositionId,
        sources: Vec<Box<dyn Source>>,
        renderer: Box<dyn Renderer<Texture>>,
        output_callback: OutputCallback,
    ) -> Self {
        assert!(!sources.is_empty(), "a composition needs at least one source");
        assert_eq!(
            sources.len(),
            renderer.number_of_input_slots(),
            "renderer '{}' expects {} input slots, got {} sources",
            renderer.name(),
            renderer.number_of_input_slots(),
            sources.len()
        );
        Composition {
            id,
            sources,
            renderer,
            output_callback,
        }
    }

    pub fn id(&self) -> &CompositionId {
        &self.id
    }

    pub fn sources(&self) -> &[Box<dyn Source>] {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut [Box<dyn Source>] {
        &mut self.sources
    }

    /// The first registered source. Ported as-is from the original's
    /// `first_source()`, which the original itself calls out as "a hacky
    /// intermediate solution" for the single-input-stream case.
    pub fn first_source(&mut self) -> &mut dyn Source {
        self.sources[0].as_mut()
    }

    pub fn renderer(&self) -> &dyn Renderer<Texture> {
        self.renderer.as_ref()
    }

    /// Hands a finished output frame to whoever registered this composition.
    pub fn emit(&self, frame: &Frame) {
        (self.output_callback)(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_time::FrameTime;
    use crate::renderer::PassThroughRenderer;
    use crate::source::SourceState;
    use std::sync::{Arc, Mutex};

    struct EmptySource;
    impl Source for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }
        fn state(&self) -> SourceState {
            SourceState::EndOfStream
        }
        fn pop_frame(&mut self) -> Option<Frame> {
            None
        }
    }

    #[test]
    fn first_source_returns_the_sole_input() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let emitted_for_cb = Arc::clone(&emitted);
        let mut composition: Composition<u32> = Composition::new(
            CompositionId("take-1".to_string()),
            vec![Box::new(EmptySource)],
            Box::new(PassThroughRenderer),
            Box::new(move |_frame: &Frame| {
                emitted_for_cb.lock().unwrap().push(());
            }),
        );
        assert_eq!(composition.first_source().name(), "empty");
        let _ = FrameTime::zero();
    }

    #[test]
    #[should_panic(expected = "at least one source")]
    fn rejects_a_composition_with_no_sources() {
        let _: Composition<u32> = Composition::new(
            CompositionId("empty".to_string()),
            vec![],
            Box::new(PassThroughRenderer),
            Box::new(|_: &Frame| {}),
        );
    }
}

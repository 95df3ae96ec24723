//! Drawable lifecycle: one renderer object per tracked marker id.
//!
//! State machine per id: Unseen -> Active -> Unseen. Creation happens on
//! the first sighting with a valid transform, updates happen in place on
//! every re-sighting, and removal happens once the id has gone unobserved
//! for more than the configured tolerance of detection cycles, so a single
//! missed detection never causes flicker.

use std::collections::HashMap;

use log::debug;

use super::transform::RenderTransform;

/// The renderer-facing surface of the pipeline. The pipeline calls these;
/// it never owns scene setup, projection or lighting.
pub trait SceneRenderer {
    /// Opaque drawable handle owned by the renderer.
    type Drawable;

    /// Instantiates a drawable for a marker id, typically by resolving the
    /// id to a model template (kart, key, effect).
    fn create_drawable(&mut self, marker_id: u32) -> Self::Drawable;

    /// Adds the drawable to the scene graph.
    fn attach(&mut self, drawable: &Self::Drawable);

    /// Repositions an attached drawable.
    fn set_transform(&mut self, drawable: &Self::Drawable, transform: &RenderTransform);

    /// Removes the drawable from the scene and releases any GPU resources
    /// (geometry, material buffers) it exclusively owns.
    fn detach(&mut self, drawable: Self::Drawable);
}

struct TrackedObject<D> {
    drawable: D,
    last_seen_cycle: u64,
}

/// Registry of live AR objects, keyed by marker id.
///
/// Invariant: at most one drawable per marker id, and no drawable stays
/// attached after its entry is removed.
pub struct ObjectRegistry<D> {
    objects: HashMap<u32, TrackedObject<D>>,
    miss_tolerance: u64,
}

impl<D> ObjectRegistry<D> {
    pub fn new(miss_tolerance: u32) -> Self {
        Self {
            objects: HashMap::new(),
            miss_tolerance: u64::from(miss_tolerance),
        }
    }

    /// Records a sighting of `id` at `cycle` with a valid transform,
    /// creating and attaching a drawable on the first sighting and
    /// updating the existing one (never recreating) otherwise.
    pub fn observe<R>(&mut self, renderer: &mut R, cycle: u64, id: u32, transform: &RenderTransform)
    where
        R: SceneRenderer<Drawable = D>,
    {
        match self.objects.get_mut(&id) {
            Some(tracked) => {
                tracked.last_seen_cycle = cycle;
                renderer.set_transform(&tracked.drawable, transform);
            }
            None => {
                debug!("marker {id}: creating drawable (cycle {cycle})");
                let drawable = renderer.create_drawable(id);
                renderer.attach(&drawable);
                renderer.set_transform(&drawable, transform);
                self.objects.insert(
                    id,
                    TrackedObject {
                        drawable,
                        last_seen_cycle: cycle,
                    },
                );
            }
        }
    }

    /// Removes every object unobserved for more than the tolerance window.
    /// An id absent for exactly `miss_tolerance` cycles survives; it is
    /// removed on the following cycle.
    pub fn sweep<R>(&mut self, renderer: &mut R, cycle: u64)
    where
        R: SceneRenderer<Drawable = D>,
    {
        let expired: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, t)| cycle.saturating_sub(t.last_seen_cycle) > self.miss_tolerance)
            .map(|(&id, _)| id)
            .collect();

        for id in expired {
            debug!("marker {id}: removing drawable (cycle {cycle})");
            if let Some(tracked) = self.objects.remove(&id) {
                renderer.detach(tracked.drawable);
            }
        }
    }

    /// Detaches everything, e.g. when the frame source goes away.
    pub fn clear<R>(&mut self, renderer: &mut R)
    where
        R: SceneRenderer<Drawable = D>,
    {
        for (_, tracked) in self.objects.drain() {
            renderer.detach(tracked.drawable);
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }
}

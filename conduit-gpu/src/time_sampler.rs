//! GPU-side timestamp sampling, grounded in `TimeSampler.h`'s `SyncPoint`/
//! `TimeSampler` and in `blade-graphics`'s `TimingFrame`/`TimingQueryPool`
//! ring (`blade-graphics/src/webgpu/mod.rs`): a small ring of query sets so
//! resolving one frame's timestamps never blocks the frame after it, a
//! resolve buffer plus a separately mappable readback buffer, and deferred
//! (polled, not awaited inline) readback so timing never stalls the GPU
//! pipeline it's measuring.
//!
//! Samples land in the owning stage's [`conduit_core::Sampler`] as
//! [`StageEvent::GpuTaskBegin`]/[`StageEvent::GpuTaskEnd`], converted from
//! device ticks to host time through one [`SyncPoint`] captured the first
//! time a query resolves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::sampler::{Sampler, StageEvent};

const RING_SIZE: usize = 3;

/// Anchors one device timestamp tick count to a host [`Instant`], so later
/// ticks can be converted without repeatedly round-tripping to the GPU.
/// Mirrors `gl::SyncPoint`.
pub struct SyncPoint {
    anchor_ticks: u64,
    anchor_host: Instant,
    period_ns: f64,
    initialized: bool,
}

impl SyncPoint {
    fn uninitialized() -> Self {
        SyncPoint {
            anchor_ticks: 0,
            anchor_host: Instant::now(),
            period_ns: 1.0,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self, anchor_ticks: u64, period_ns: f64) {
        self.anchor_ticks = anchor_ticks;
        self.anchor_host = Instant::now();
        self.period_ns = period_ns;
        self.initialized = true;
    }

    /// Converts a device timestamp tick count to a host-clock `Instant`,
    /// mirroring `SyncPoint::convert_gl_time_to_host_time`.
    pub fn convert_to_host_time(&self, ticks: u64) -> Instant {
        let delta_ticks = ticks as i128 - self.anchor_ticks as i128;
        let delta_ns = (delta_ticks as f64 * self.period_ns) as i64;
        if delta_ns >= 0 {
            self.anchor_host + Duration::from_nanos(delta_ns as u64)
        } else {
            self.anchor_host
                .checked_sub(Duration::from_nanos((-delta_ns) as u64))
                .unwrap_or(self.anchor_host)
        }
    }
}

struct TimingSlot {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    in_flight: bool,
}

impl TimingSlot {
    fn new(device: &wgpu::Device) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("conduit GPU timing query set"),
            ty: wgpu::QueryType::Timestamp,
            count: 2, // begin + end
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("conduit GPU timing resolve buffer"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("conduit GPU timing readback buffer"),
            size: 16,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        TimingSlot {
            query_set,
            resolve_buffer,
            readback_buffer,
            in_flight: false,
        }
    }
}

/// A deferred GPU timestamp query ring feeding a single stage's
/// [`Sampler`]. Mirrors `gl::TimeSampler`, minus the OpenGL timer-query
/// object pool -- `wgpu::QuerySet` already manages the underlying query
/// slots.
pub struct GpuTimeSampler {
    sampler: Arc<Sampler>,
    slots: [TimingSlot; RING_SIZE],
    write_index: usize,
    resolve_index: usize,
    sync_point: SyncPoint,
    period_ns: f64,
}

impl GpuTimeSampler {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, sampler: Arc<Sampler>) -> Self {
        GpuTimeSampler {
            sampler,
            slots: std::array::from_fn(|_| TimingSlot::new(device)),
            write_index: 0,
            resolve_index: 0,
            sync_point: SyncPoint::uninitialized(),
            period_ns: queue.get_timestamp_period() as f64,
        }
    }

    pub fn sync_point(&self) -> &SyncPoint {
        &self.sync_point
    }

    /// Writes the begin timestamp for the current ring slot.
    pub fn sample_begin(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.write_timestamp(&self.slots[self.write_index].query_set, 0);
    }

    /// Writes the end timestamp and schedules the slot's resolve + readback
    /// copy, advancing to the next ring slot.
    pub fn sample_end(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let slot = &mut self.slots[self.write_index];
        encoder.write_timestamp(&slot.query_set, 1);
        encoder.resolve_query_set(&slot.query_set, 0..2, &slot.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&slot.resolve_buffer, 0, &slot.readback_buffer, 0, 16);
        slot.in_flight = true;
        self.write_index = (self.write_index + 1) % RING_SIZE;
    }

    /// Non-blocking-ish poll of the oldest not-yet-resolved slot; if its
    /// readback has landed, feeds `GpuTaskBegin`/`GpuTaskEnd` into the
    /// stage's sampler and frees the slot for reuse.
    pub fn flush(&mut self, device: &wgpu::Device) {
        let idx = self.resolve_index;
        if !self.slots[idx].in_flight {
            return;
        }

        let (tx, rx) = std::sync::mpsc::channel();
        {
            let slice = self.slots[idx].readback_buffer.slice(..);
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        }
        let _ = device.poll(wgpu::PollType::Wait);

        let mapped = matches!(rx.try_recv(), Ok(Ok(())));
        if !mapped {
            return;
        }

        let (begin, end) = {
            let slice = self.slots[idx].readback_buffer.slice(..);
            let data = slice.get_mapped_range();
            let ticks: &[u64] = bytemuck::cast_slice(&data);
            (ticks[0], ticks[1])
        };
        self.slots[idx].readback_buffer.unmap();
        self.slots[idx].in_flight = false;
        self.resolve_index = (self.resolve_index + 1) % RING_SIZE;

        if !self.sync_point.is_initialized() {
            self.sync_point.initialize(begin, self.period_ns);
        }
        self.sampler
            .enter_sample(StageEvent::GpuTaskBegin, self.sync_point.convert_to_host_time(begin));
        self.sampler
            .enter_sample(StageEvent::GpuTaskEnd, self.sync_point.convert_to_host_time(end));
    }

    /// Blocks until every slot still `in_flight` has been resolved, for use
    /// at shutdown where there is no next frame to opportunistically flush
    /// against. Unlike `flush`, which gives up after one non-blocking poll,
    /// this waits out the map_async round trip for each remaining slot.
    pub fn drain(&mut self, device: &wgpu::Device) {
        for _ in 0..RING_SIZE {
            if !self.slots[self.resolve_index].in_flight {
                self.resolve_index = (self.resolve_index + 1) % RING_SIZE;
                continue;
            }
            let idx = self.resolve_index;

            let (tx, rx) = std::sync::mpsc::channel();
            {
                let slice = self.slots[idx].readback_buffer.slice(..);
                slice.map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send(result);
                });
            }
            loop {
                let _ = device.poll(wgpu::PollType::Wait);
                match rx.try_recv() {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => {
                        log::error!("GPU timing readback failed during drain: {e}");
                        self.slots[idx].in_flight = false;
                        self.resolve_index = (self.resolve_index + 1) % RING_SIZE;
                        continue;
                    }
                    Err(std::sync::mpsc::TryRecvError::Empty) => continue,
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                        self.slots[idx].in_flight = false;
                        break;
                    }
                }
            }
            if !self.slots[idx].in_flight {
                continue;
            }

            let (begin, end) = {
                let slice = self.slots[idx].readback_buffer.slice(..);
                let data = slice.get_mapped_range();
                let ticks: &[u64] = bytemuck::cast_slice(&data);
                (ticks[0], ticks[1])
            };
            self.slots[idx].readback_buffer.unmap();
            self.slots[idx].in_flight = false;
            self.resolve_index = (self.resolve_index + 1) % RING_SIZE;

            if !self.sync_point.is_initialized() {
                self.sync_point.initialize(begin, self.period_ns);
            }
            self.sampler.enter_sample(
                StageEvent::GpuTaskBegin,
                self.sync_point.convert_to_host_time(begin),
            );
            self.sampler.enter_sample(
                StageEvent::GpuTaskEnd,
                self.sync_point.convert_to_host_time(end),
            );
        }
    }
}

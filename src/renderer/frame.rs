// Frame orchestration
//
// Drives one iteration of the render loop over N frame slots:
//   wait -> acquire -> reset -> record -> submit -> present -> advance
//
// The GPU side sits behind `FrameTarget` so the sequencing (slot rotation,
// fence discipline, when to rebuild the swapchain) is independent of Vulkan.

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::backend::RenderResult;
use crate::window::WindowHost;

/// Where a frame slot currently is in its cycle. A step that fails leaves
/// the slot in the phase it had reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    /// Waiting on an image from the swapchain
    Acquiring,
    /// Fence reset, commands being recorded; nothing is queued yet
    Recording,
    /// Work queued on the GPU; the image has not been handed to present
    Submitted,
    /// Image queued for presentation; a rebuild may still be pending
    Presenting,
}

/// What happened to one iteration of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Frame was submitted and presented; `recreated` if the swapchain was
    /// rebuilt afterwards
    Presented { recreated: bool },
    /// Acquire found the swapchain out of date; nothing was submitted
    Skipped,
}

/// GPU-facing operations for a single frame slot
pub trait FrameTarget {
    /// Block until the slot's previous submission has completed
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    /// Unsignal the slot's fence; a submission will follow
    fn reset_slot(&mut self, slot: usize) -> RenderResult<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;

    fn submit(&mut self, slot: usize) -> RenderResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;

    /// Rebuild the swapchain. `Ok(false)` if the window closed while waiting.
    fn recreate_swapchain(&mut self, window: &mut dyn WindowHost) -> RenderResult<bool>;
}

pub struct FrameOrchestrator {
    frames_in_flight: usize,
    frame_counter: u64,
    phases: Vec<SlotPhase>,
    recreations: u64,
}

impl FrameOrchestrator {
    pub fn new(frames_in_flight: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            frames_in_flight,
            frame_counter: 0,
            phases: vec![SlotPhase::Idle; frames_in_flight],
            recreations: 0,
        }
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    pub fn phase(&self, slot: usize) -> SlotPhase {
        self.phases[slot]
    }

    /// Slots that stopped partway through a frame, as `(slot, phase)`
    pub fn interrupted_slots(&self) -> impl Iterator<Item = (usize, SlotPhase)> + '_ {
        (0..self.frames_in_flight)
            .map(|slot| (slot, self.phase(slot)))
            .filter(|&(_, phase)| phase != SlotPhase::Idle)
    }

    /// Run one iteration of the loop against `target`
    pub fn draw_frame(
        &mut self,
        target: &mut dyn FrameTarget,
        window: &mut dyn WindowHost,
    ) -> RenderResult<FrameOutcome> {
        let slot = self.current_slot();

        target.wait_for_slot(slot)?;

        self.phases[slot] = SlotPhase::Acquiring;
        let (image_index, acquire_suboptimal) = match target.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                // Fence stays signaled: nothing was submitted on this slot
                log::debug!("Frame {}: swapchain out of date at acquire", self.frame_counter);
                self.phases[slot] = SlotPhase::Idle;
                self.recreate(target, window)?;
                self.frame_counter += 1;
                return Ok(FrameOutcome::Skipped);
            }
        };

        target.reset_slot(slot)?;

        self.phases[slot] = SlotPhase::Recording;
        target.record(slot, image_index)?;

        target.submit(slot)?;
        self.phases[slot] = SlotPhase::Submitted;

        let present = target.present(slot, image_index)?;
        self.phases[slot] = SlotPhase::Presenting;

        let resized = window.resize_flag().is_raised();
        let recreated = if acquire_suboptimal || resized || present != PresentOutcome::Optimal {
            log::trace!(
                "Frame {}: recreating (acquire suboptimal: {}, resized: {}, present: {:?})",
                self.frame_counter,
                acquire_suboptimal,
                resized,
                present
            );
            self.recreate(target, window)?
        } else {
            false
        };
        self.phases[slot] = SlotPhase::Idle;

        self.frame_counter += 1;
        Ok(FrameOutcome::Presented { recreated })
    }

    fn recreate(
        &mut self,
        target: &mut dyn FrameTarget,
        window: &mut dyn WindowHost,
    ) -> RenderResult<bool> {
        // Any pending resize is covered by this rebuild
        window.resize_flag().take();

        let rebuilt = target.recreate_swapchain(window)?;
        if rebuilt {
            self.recreations += 1;
        }
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RenderError;
    use crate::window::tests::MockWindow;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait { slot: usize, blocked: bool },
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
    }

    /// Fence-accurate stand-in for the Vulkan frame resources
    struct MockTarget {
        calls: Vec<Call>,
        fence_signaled: Vec<bool>,
        fence_observed: Vec<bool>,
        /// GPU finishes each submission before the next CPU call
        instant_gpu: bool,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        image_count: u32,
        next_image: u32,
        fail_submit: bool,
        fail_present: bool,
        fail_recreate: bool,
    }

    fn device_lost<T>() -> RenderResult<T> {
        Err(RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    }

    impl MockTarget {
        fn new(slots: usize) -> Self {
            Self {
                calls: Vec::new(),
                fence_signaled: vec![true; slots],
                fence_observed: vec![false; slots],
                instant_gpu: true,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_count: 3,
                next_image: 0,
                fail_submit: false,
                fail_present: false,
                fail_recreate: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameTarget for MockTarget {
        fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
            let blocked = !self.fence_signaled[slot];
            // The wait returns once the GPU signals
            self.fence_signaled[slot] = true;
            self.fence_observed[slot] = true;
            self.calls.push(Call::Wait { slot, blocked });
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            let outcome = self.acquire_script.pop_front().unwrap_or(AcquireOutcome::Ready {
                image_index: self.next_image,
                suboptimal: false,
            });
            if matches!(outcome, AcquireOutcome::Ready { .. }) {
                self.next_image = (self.next_image + 1) % self.image_count;
            }
            Ok(outcome)
        }

        fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
            assert!(self.fence_signaled[slot], "reset of a fence that never signaled");
            self.fence_signaled[slot] = false;
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
            assert!(
                self.fence_observed[slot],
                "slot {} re-recorded before its fence was observed",
                slot
            );
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RenderResult<()> {
            if self.fail_submit {
                return device_lost();
            }
            self.fence_observed[slot] = false;
            if self.instant_gpu {
                self.fence_signaled[slot] = true;
            }
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
            if self.fail_present {
                return device_lost();
            }
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Optimal))
        }

        fn recreate_swapchain(&mut self, window: &mut dyn WindowHost) -> RenderResult<bool> {
            if self.fail_recreate {
                return device_lost();
            }
            if crate::window::wait_for_drawable_extent(window).is_none() {
                return Ok(false);
            }
            self.calls.push(Call::Recreate);
            Ok(true)
        }
    }

    #[test]
    fn slots_rotate_with_the_frame_counter() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);

        for k in 0..6u64 {
            assert_eq!(orchestrator.current_slot(), (k % 2) as usize);
            let outcome = orchestrator.draw_frame(&mut target, &mut window).unwrap();
            assert_eq!(outcome, FrameOutcome::Presented { recreated: false });
        }

        assert_eq!(orchestrator.frame_counter(), 6);
        let submitted: Vec<usize> = target
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(submitted, vec![0, 1, 0, 1, 0, 1]);
        assert!((0..2).all(|slot| orchestrator.phase(slot) == SlotPhase::Idle));
    }

    #[test]
    fn failed_submit_leaves_the_slot_recording() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);
        target.fail_submit = true;

        assert!(orchestrator.draw_frame(&mut target, &mut window).is_err());
        assert_eq!(orchestrator.phase(0), SlotPhase::Recording);
        assert_eq!(orchestrator.phase(1), SlotPhase::Idle);
        assert_eq!(orchestrator.frame_counter(), 0);
    }

    #[test]
    fn failed_present_leaves_work_submitted() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);
        target.fail_present = true;

        assert!(orchestrator.draw_frame(&mut target, &mut window).is_err());
        assert_eq!(orchestrator.phase(0), SlotPhase::Submitted);
        assert_eq!(target.count(|c| matches!(c, Call::Submit(0))), 1);
        assert_eq!(
            orchestrator.interrupted_slots().collect::<Vec<_>>(),
            vec![(0, SlotPhase::Submitted)]
        );
    }

    #[test]
    fn failed_rebuild_after_present_leaves_the_slot_presenting() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);
        target.present_script.push_back(PresentOutcome::OutOfDate);
        target.fail_recreate = true;

        assert!(orchestrator.draw_frame(&mut target, &mut window).is_err());
        assert_eq!(orchestrator.phase(0), SlotPhase::Presenting);
        assert_eq!(target.count(|c| matches!(c, Call::Present(0, _))), 1);
    }

    #[test]
    fn completed_frames_leave_no_interrupted_slots() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);
        target.present_script.push_back(PresentOutcome::Suboptimal);

        for _ in 0..3 {
            orchestrator.draw_frame(&mut target, &mut window).unwrap();
        }
        assert_eq!(orchestrator.interrupted_slots().count(), 0);
    }

    #[test]
    fn each_frame_follows_the_fixed_sequence() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);

        orchestrator.draw_frame(&mut target, &mut window).unwrap();

        assert_eq!(
            target.calls,
            vec![
                Call::Wait {
                    slot: 0,
                    blocked: false
                },
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);

        for _ in 0..5 {
            orchestrator.draw_frame(&mut target, &mut window).unwrap();
        }
        let submits_before = target.count(|c| matches!(c, Call::Submit(_)));
        let calls_before = target.calls.len();

        // Frame 5 (slot 1)
        target.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let outcome = orchestrator.draw_frame(&mut target, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(orchestrator.recreations(), 1);
        assert_eq!(orchestrator.frame_counter(), 6);
        assert_eq!(target.count(|c| matches!(c, Call::Submit(_))), submits_before);
        assert_eq!(
            &target.calls[calls_before..],
            &[
                Call::Wait {
                    slot: 1,
                    blocked: false
                },
                Call::Acquire(1),
                Call::Recreate,
            ]
        );
        // Nothing was submitted, so the slot's fence was never reset
        assert!(target.fence_signaled[1]);

        // Frame 6 proceeds normally on slot 0
        let outcome = orchestrator.draw_frame(&mut target, &mut window).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { recreated: false });
        assert_eq!(target.calls.last(), Some(&Call::Present(0, 2)));
        assert_eq!(orchestrator.recreations(), 1);

        // Frame 7 reuses the skipped slot without blocking
        orchestrator.draw_frame(&mut target, &mut window).unwrap();
        assert!(target.calls.contains(&Call::Wait {
            slot: 1,
            blocked: false
        }));
        assert_eq!(target.calls.last(), Some(&Call::Present(1, 0)));
    }

    #[test]
    fn first_frames_do_not_block() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        target.instant_gpu = false;
        let mut window = MockWindow::new(800, 600);

        orchestrator.draw_frame(&mut target, &mut window).unwrap();
        orchestrator.draw_frame(&mut target, &mut window).unwrap();

        let waits: Vec<bool> = target
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait { blocked, .. } => Some(*blocked),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![false, false]);

        // Third frame wraps to slot 0, whose work is still pending
        orchestrator.draw_frame(&mut target, &mut window).unwrap();
        assert!(target.calls.contains(&Call::Wait {
            slot: 0,
            blocked: true
        }));
    }

    #[test]
    fn slow_gpu_never_sees_early_re_record() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        target.instant_gpu = false;
        let mut window = MockWindow::new(800, 600);

        // MockTarget::record asserts the fence was observed first
        for _ in 0..10 {
            orchestrator.draw_frame(&mut target, &mut window).unwrap();
        }
        assert_eq!(target.count(|c| matches!(c, Call::Record(..))), 10);
    }

    #[test]
    fn stale_present_recreates_after_presenting() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);

        target.present_script.push_back(PresentOutcome::Suboptimal);
        let outcome = orchestrator.draw_frame(&mut target, &mut window).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { recreated: true });
        assert_eq!(
            &target.calls[target.calls.len() - 2..],
            &[Call::Present(0, 0), Call::Recreate]
        );

        target.present_script.push_back(PresentOutcome::OutOfDate);
        orchestrator.draw_frame(&mut target, &mut window).unwrap();
        assert_eq!(orchestrator.recreations(), 2);
    }

    #[test]
    fn suboptimal_acquire_still_presents_then_recreates() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);

        target.acquire_script.push_back(AcquireOutcome::Ready {
            image_index: 2,
            suboptimal: true,
        });
        let outcome = orchestrator.draw_frame(&mut target, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { recreated: true });
        assert!(target.calls.contains(&Call::Present(0, 2)));
        assert_eq!(target.calls.last(), Some(&Call::Recreate));
    }

    #[test]
    fn resize_notifications_coalesce_into_one_rebuild() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(800, 600);

        window.resize.raise();
        window.resize.raise();
        orchestrator.draw_frame(&mut target, &mut window).unwrap();
        orchestrator.draw_frame(&mut target, &mut window).unwrap();

        assert_eq!(target.count(|c| matches!(c, Call::Recreate)), 1);
        assert!(!window.resize.is_raised());
    }

    #[test]
    fn minimized_window_stalls_the_rebuild() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(0, 0).then(0, 0).then(1024, 768);

        target.acquire_script.push_back(AcquireOutcome::OutOfDate);
        orchestrator.draw_frame(&mut target, &mut window).unwrap();

        assert_eq!(window.waits, 2);
        assert_eq!(orchestrator.recreations(), 1);
    }

    #[test]
    fn closing_while_minimized_skips_the_rebuild() {
        let mut orchestrator = FrameOrchestrator::new(2);
        let mut target = MockTarget::new(2);
        let mut window = MockWindow::new(0, 0);

        target.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let outcome = orchestrator.draw_frame(&mut target, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(orchestrator.recreations(), 0);
        assert_eq!(target.count(|c| matches!(c, Call::Recreate)), 0);
        assert!(window.closed);
    }
}

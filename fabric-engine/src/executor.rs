// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Single-threaded executor.
//!
//! Tasks are polled when they are woken. Once no task is runnable, time is
//! advanced to the next cycle that has waiting tasks. The executor stops when
//! no task is waiting or when only background tasks remain.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use fabric_track::entity::Entity;
use fabric_track::set_time;

use crate::clock::Clock;
use crate::types::SimResult;

fn task_raw_waker(task: Rc<Task>) -> RawWaker {
    let vtable = &RawWakerVTable::new(clone_raw_waker, wake_task, wake_task_by_ref, drop_task);
    let ptr = Rc::into_raw(task) as *const ();
    RawWaker::new(ptr, vtable)
}

fn waker_for_task(task: Rc<Task>) -> Waker {
    // SAFETY: the waker never leaves the executor thread and the vtable keeps
    // the reference count of the task balanced.
    unsafe { Waker::from_raw(task_raw_waker(task)) }
}

unsafe fn clone_raw_waker(data: *const ()) -> RawWaker {
    unsafe {
        Rc::increment_strong_count(data as *const Task);
    }
    let vtable = &RawWakerVTable::new(clone_raw_waker, wake_task, wake_task_by_ref, drop_task);
    RawWaker::new(data, vtable)
}

unsafe fn wake_task(data: *const ()) {
    let task = unsafe { Rc::from_raw(data as *const Task) };
    let state = task.executor_state.clone();
    state.new_tasks.borrow_mut().push(task);
}

unsafe fn wake_task_by_ref(data: *const ()) {
    let task = unsafe { Rc::from_raw(data as *const Task) };
    task.executor_state
        .new_tasks
        .borrow_mut()
        .push(task.clone());
    std::mem::forget(task);
}

unsafe fn drop_task(data: *const ()) {
    drop(unsafe { Rc::from_raw(data as *const Task) });
}

struct Task {
    future: RefCell<Pin<Box<dyn Future<Output = SimResult>>>>,
    executor_state: Rc<ExecutorState>,
}

impl Task {
    fn new(
        future: impl Future<Output = SimResult> + 'static,
        executor_state: Rc<ExecutorState>,
    ) -> Task {
        Task {
            future: RefCell::new(Box::pin(future)),
            executor_state,
        }
    }

    fn poll(&self, context: &mut Context) -> Poll<SimResult> {
        self.future.borrow_mut().as_mut().poll(context)
    }
}

struct ExecutorState {
    task_queue: RefCell<Vec<Rc<Task>>>,
    new_tasks: RefCell<Vec<Rc<Task>>>,
    clock: Clock,
}

/// Single-threaded executor
///
/// This is a thin-wrapper (using [`Rc`]) around the real executor, so that
/// this struct can be cloned and passed around.
#[derive(Clone)]
pub struct Executor {
    pub entity: Arc<Entity>,
    state: Rc<ExecutorState>,
}

impl Executor {
    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.state
            .new_tasks
            .borrow_mut()
            .push(Rc::new(Task::new(future, self.state.clone())));
    }

    /// Run until every foreground task has completed.
    ///
    /// The first task to return an error stops the simulation and the error
    /// is returned.
    pub fn run(&self) -> SimResult {
        loop {
            self.step()?;

            if self.state.new_tasks.borrow().is_empty() {
                if self.state.clock.can_exit() {
                    break;
                }
                match self.state.clock.advance() {
                    Some(wakers) => {
                        set_time!(self.entity ; self.state.clock.now());
                        for task_waker in wakers {
                            task_waker.waker.wake();
                        }
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn step(&self) -> SimResult {
        let mut task_queue = self.state.task_queue.borrow_mut();
        task_queue.append(&mut self.state.new_tasks.borrow_mut());

        for task in task_queue.drain(..) {
            let waker = waker_for_task(task.clone());
            let mut context = Context::from_waker(&waker);

            match task.poll(&mut context) {
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Ready(Ok(())) => {}
                // The task has parked itself on the clock
                Poll::Pending => {}
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.state.clock.clone()
    }
}

/// `Spawner` spawns new futures into the executor.
#[derive(Clone)]
pub struct Spawner {
    state: Rc<ExecutorState>,
}

impl Spawner {
    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.state
            .new_tasks
            .borrow_mut()
            .push(Rc::new(Task::new(future, self.state.clone())));
    }
}

#[must_use]
pub fn new_executor_and_spawner(top: &Arc<Entity>) -> (Executor, Spawner) {
    let state = Rc::new(ExecutorState {
        task_queue: RefCell::new(Vec::new()),
        new_tasks: RefCell::new(Vec::new()),
        clock: Clock::new(),
    });
    let entity = Arc::new(Entity::new(top, "executor"));
    (
        Executor {
            entity,
            state: state.clone(),
        },
        Spawner { state },
    )
}

//! Storage lifecycle, shadowing, timeouts, and cancellation.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use common::*;
use tasktree::{
    on_group_done, on_group_setup, parallel, sync, DoneResult, DoneWith, Group, GroupItem,
    Storage, TaskTree,
};

/// Builds a group that declares `storage`, writes its own id into it
/// during setup, and records the value it reads back in its done
/// handler.
fn shadowing_group(
    storage: &Storage<i32>,
    readings: &Arc<Mutex<Vec<i32>>>,
    id: i32,
    children: Vec<GroupItem>,
) -> Group {
    let mut items = vec![
        GroupItem::from(storage),
        on_group_setup({
            let storage = storage.clone();
            move || storage.set(id)
        }),
    ];
    items.extend(children);
    items.push(on_group_done({
        let storage = storage.clone();
        let readings = readings.clone();
        move || {
            readings.lock().unwrap().push(storage.get());
        }
    }));
    Group::new(items)
}

#[test]
fn inner_storage_shadows_the_outer_instance() {
    let storage: Storage<i32> = Storage::new();
    let readings = Arc::new(Mutex::new(Vec::new()));

    let level3a = shadowing_group(&storage, &readings, 3, vec![]);
    let level3b = shadowing_group(&storage, &readings, 4, vec![]);
    let level2 = shadowing_group(
        &storage,
        &readings,
        2,
        vec![GroupItem::from(level3a), GroupItem::from(level3b)],
    );
    let root = shadowing_group(&storage, &readings, 1, vec![GroupItem::from(level2)]);

    let mut tree = TaskTree::new(root);
    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Success);

    // Every group reads back its own id: the innermost instance was
    // active for each handler, and instances unwound inside out.
    assert_eq!(*readings.lock().unwrap(), vec![3, 4, 2, 1]);
    assert_eq!(tree.active_storage_count(), 0);
}

#[test]
fn storage_callbacks_bracket_the_run() {
    let storage: Storage<Vec<i32>> = Storage::new();
    let log = log_book();
    let output = Arc::new(Mutex::new(Vec::new()));

    let collect = GroupItem::from(Group::new([
        GroupItem::from(&storage),
        ok_task(&log, 1),
        on_group_done({
            let storage = storage.clone();
            move || storage.with_mut(|values| values.push(7))
        }),
    ]));
    let mut tree = TaskTree::new(Group::new([collect]));
    tree.on_storage_setup(&storage, |values| values.push(1));
    tree.on_storage_done(&storage, {
        let output = output.clone();
        move |values| output.lock().unwrap().extend_from_slice(values)
    });

    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Success);
    // Setup seeded the instance before the task ran; done saw the
    // handler's write.
    assert_eq!(*output.lock().unwrap(), vec![1, 7]);
}

#[test]
fn task_timeout_cancels_the_task() {
    let log = log_book();
    let timed = clock_task(&log, 1, DoneResult::Success, LONG).with_timeout(SHORT);
    let mut tree = TaskTree::new(Group::new([GroupItem::from(timed)]));

    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Error);
    assert_eq!(entries(&log), vec![(1, Mark::Setup), (1, Mark::Canceled)]);
    assert_eq!(tree.progress_value(), 1);
}

#[test]
fn task_timeout_handler_runs_before_the_cancel() {
    let log = log_book();
    let timed = clock_task(&log, 1, DoneResult::Success, LONG)
        .with_timeout_and(SHORT, timeout_logger(&log, 1));
    let mut tree = TaskTree::new(Group::new([GroupItem::from(timed)]));

    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Error);
    assert_eq!(
        entries(&log),
        vec![(1, Mark::Setup), (1, Mark::Timeout), (1, Mark::Canceled)]
    );
}

#[test]
fn task_that_finishes_in_time_ignores_its_timeout() {
    let log = log_book();
    let timed = clock_task(&log, 1, DoneResult::Success, SHORT).with_timeout(LONG);
    let mut tree = TaskTree::new(Group::new([GroupItem::from(timed)]));

    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Success);
    assert_eq!(entries(&log), vec![(1, Mark::Setup), (1, Mark::Success)]);
}

#[test]
fn group_timeout_cancels_the_subtree() {
    let log = log_book();
    let inner = Group::new([ok_task_for(&log, 1, LONG), group_done(&log, 1)])
        .with_timeout_and(SHORT, timeout_logger(&log, 1));
    let recipe = Group::new([GroupItem::from(inner), group_done(&log, 0)]);
    let mut tree = TaskTree::new(recipe);

    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Error);
    assert_eq!(
        entries(&log),
        vec![
            (1, Mark::Setup),
            (1, Mark::Timeout),
            (1, Mark::Canceled),
            (1, Mark::GroupCanceled),
            (0, Mark::GroupError),
        ]
    );
    assert_eq!(tree.progress_value(), tree.progress_maximum());
}

#[test]
fn progress_counts_every_async_leaf_once() {
    let log = log_book();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recipe = Group::new([
        ok_task(&log, 1),
        err_task(&log, 2),
        ok_task(&log, 3),
        ok_task(&log, 4),
    ]);
    let mut tree = TaskTree::new(recipe);
    tree.on_progress_changed({
        let seen = seen.clone();
        move |value| seen.lock().unwrap().push(value)
    });

    assert_eq!(tree.run_blocking().unwrap(), DoneWith::Error);
    // Tasks 3 and 4 were skipped but still reported: 1 and 2 complete
    // individually, the final batch arrives when the group settles.
    assert_eq!(tree.progress_value(), 4);
    assert_eq!(tree.progress_maximum(), 4);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&1));
    assert_eq!(seen.last(), Some(&4));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn external_cancel_settles_with_cancel_outcome() {
    let log = log_book();
    let recipe = Group::new([
        parallel(),
        ok_task_for(&log, 1, LONG),
        ok_task_for(&log, 2, LONG),
        group_done(&log, 0),
    ]);
    let mut tree = TaskTree::new(recipe);

    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        thread::sleep(SHORT);
        let _ = cancel_tx.send(());
    });

    let outcome = tree.run_blocking_with_cancel(&cancel_rx).unwrap();

    assert_eq!(outcome, DoneWith::Cancel);
    assert_eq!(
        entries(&log),
        vec![
            (1, Mark::Setup),
            (2, Mark::Setup),
            (1, Mark::Canceled),
            (2, Mark::Canceled),
            (0, Mark::GroupCanceled),
        ]
    );
    assert_eq!(tree.progress_value(), tree.progress_maximum());
}

#[test]
fn handler_panic_becomes_an_error_outcome() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));

    let log = log_book();
    let recipe = Group::new([
        ok_task(&log, 1),
        sync(|| -> () {
            panic!("handler blew up");
        }),
        ok_task(&log, 3),
        group_done(&log, 0),
    ]);
    let outcome = TaskTree::new(recipe).run_blocking();

    std::panic::set_hook(previous);

    assert_eq!(outcome.unwrap(), DoneWith::Error);
    assert_eq!(
        entries(&log),
        vec![
            (1, Mark::Setup),
            (1, Mark::Success),
            (0, Mark::GroupError),
        ]
    );
}

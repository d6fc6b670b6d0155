//! Handler conversion traits.
//!
//! Internally every handler has one canonical full-argument signature;
//! user closures with fewer arguments (or no return value) are widened
//! at the API boundary through these marker-parameterized traits. The
//! marker type parameter disambiguates the blanket impls, so a closure
//! resolves to exactly one conversion by its own signature.
//!
//! A handler that returns nothing gets the natural default: `Continue`
//! for setup, `Success` for sync leaves, and the outcome-derived default
//! for done handlers (Cancel counts as the error side).

use std::rc::Rc;

use crate::outcome::{DoneResult, DoneWith, SetupResult};

pub(crate) type GroupSetupFn = Rc<dyn Fn() -> SetupResult>;
pub(crate) type GroupDoneFn = Rc<dyn Fn(DoneWith) -> DoneResult>;
pub(crate) type SyncFn = Rc<dyn Fn() -> DoneResult>;
pub(crate) type TaskSetupFn<A> = Rc<dyn Fn(&mut A) -> SetupResult>;
pub(crate) type TaskDoneFn<A> = Rc<dyn Fn(&A, DoneWith) -> DoneResult>;

/// Closures accepted as a group setup handler.
pub trait IntoGroupSetup<Marker> {
    #[doc(hidden)]
    fn into_group_setup(self) -> GroupSetupFn;
}

impl<F> IntoGroupSetup<fn() -> SetupResult> for F
where
    F: Fn() -> SetupResult + 'static,
{
    fn into_group_setup(self) -> GroupSetupFn {
        Rc::new(self)
    }
}

impl<F> IntoGroupSetup<fn()> for F
where
    F: Fn() + 'static,
{
    fn into_group_setup(self) -> GroupSetupFn {
        Rc::new(move || {
            self();
            SetupResult::Continue
        })
    }
}

/// Closures accepted as a group done handler.
pub trait IntoGroupDone<Marker> {
    #[doc(hidden)]
    fn into_group_done(self) -> GroupDoneFn;
}

impl<F> IntoGroupDone<fn(DoneWith) -> DoneResult> for F
where
    F: Fn(DoneWith) -> DoneResult + 'static,
{
    fn into_group_done(self) -> GroupDoneFn {
        Rc::new(self)
    }
}

impl<F> IntoGroupDone<fn(DoneWith)> for F
where
    F: Fn(DoneWith) + 'static,
{
    fn into_group_done(self) -> GroupDoneFn {
        Rc::new(move |with| {
            self(with);
            with.default_result()
        })
    }
}

impl<F> IntoGroupDone<fn() -> DoneResult> for F
where
    F: Fn() -> DoneResult + 'static,
{
    fn into_group_done(self) -> GroupDoneFn {
        Rc::new(move |_| self())
    }
}

impl<F> IntoGroupDone<fn()> for F
where
    F: Fn() + 'static,
{
    fn into_group_done(self) -> GroupDoneFn {
        Rc::new(move |with| {
            self();
            with.default_result()
        })
    }
}

/// Closures accepted as a sync leaf.
pub trait IntoSync<Marker> {
    #[doc(hidden)]
    fn into_sync(self) -> SyncFn;
}

impl<F> IntoSync<fn() -> DoneResult> for F
where
    F: Fn() -> DoneResult + 'static,
{
    fn into_sync(self) -> SyncFn {
        Rc::new(self)
    }
}

impl<F> IntoSync<fn()> for F
where
    F: Fn() + 'static,
{
    fn into_sync(self) -> SyncFn {
        Rc::new(move || {
            self();
            DoneResult::Success
        })
    }
}

/// Closures accepted as a task setup handler.
pub trait IntoTaskSetup<A, Marker> {
    #[doc(hidden)]
    fn into_task_setup(self) -> TaskSetupFn<A>;
}

impl<A, F> IntoTaskSetup<A, fn(&mut A) -> SetupResult> for F
where
    A: 'static,
    F: Fn(&mut A) -> SetupResult + 'static,
{
    fn into_task_setup(self) -> TaskSetupFn<A> {
        Rc::new(self)
    }
}

impl<A, F> IntoTaskSetup<A, fn(&mut A)> for F
where
    A: 'static,
    F: Fn(&mut A) + 'static,
{
    fn into_task_setup(self) -> TaskSetupFn<A> {
        Rc::new(move |adapter| {
            self(adapter);
            SetupResult::Continue
        })
    }
}

/// Closures accepted as a task done handler.
pub trait IntoTaskDone<A, Marker> {
    #[doc(hidden)]
    fn into_task_done(self) -> TaskDoneFn<A>;
}

impl<A, F> IntoTaskDone<A, fn(&A, DoneWith) -> DoneResult> for F
where
    A: 'static,
    F: Fn(&A, DoneWith) -> DoneResult + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(self)
    }
}

impl<A, F> IntoTaskDone<A, fn(&A, DoneWith)> for F
where
    A: 'static,
    F: Fn(&A, DoneWith) + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |adapter, with| {
            self(adapter, with);
            with.default_result()
        })
    }
}

impl<A, F> IntoTaskDone<A, fn(&A) -> DoneResult> for F
where
    A: 'static,
    F: Fn(&A) -> DoneResult + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |adapter, _| self(adapter))
    }
}

impl<A, F> IntoTaskDone<A, fn(&A)> for F
where
    A: 'static,
    F: Fn(&A) + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |adapter, with| {
            self(adapter);
            with.default_result()
        })
    }
}

impl<A, F> IntoTaskDone<A, fn(DoneWith) -> DoneResult> for F
where
    A: 'static,
    F: Fn(DoneWith) -> DoneResult + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |_, with| self(with))
    }
}

impl<A, F> IntoTaskDone<A, fn(DoneWith)> for F
where
    A: 'static,
    F: Fn(DoneWith) + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |_, with| {
            self(with);
            with.default_result()
        })
    }
}

impl<A, F> IntoTaskDone<A, fn() -> DoneResult> for F
where
    A: 'static,
    F: Fn() -> DoneResult + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |_, _| self())
    }
}

impl<A, F> IntoTaskDone<A, fn()> for F
where
    A: 'static,
    F: Fn() + 'static,
{
    fn into_task_done(self) -> TaskDoneFn<A> {
        Rc::new(move |_, with| {
            self();
            with.default_result()
        })
    }
}

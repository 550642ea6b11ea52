use std::sync::{Arc, Weak};

use futures::{
    future::{abortable, try_join_all, Aborted, BoxFuture, WeakShared},
    FutureExt,
};

use crate::{
    arguments::{Argument, Arguments},
    errors::InjectError,
    events::{EventPayload, Milestone},
    factories::{Dependencies, DynFactory, InstanceFactory},
    key::{Key, ReadyRequirement, Target},
    lifecycle::ReadyContext,
    provider::{Producer, Provider, Registration},
    resolver::deferred::DeferredHandle,
    scope::{ConstructFuture, Scope, Slot},
    types::{DynError, Injectable, Instance, Origin, ReadyFuture, ReadyState, TypeInfo},
    wait_graph::{Node, Requester},
};

/// Context of one resolution request
#[derive(Debug, Clone)]
pub(crate) struct Cx {
    /// Construction or readiness drive on whose behalf the request is made
    pub(crate) requester: Option<Requester>,
    /// Readiness that `ReadyRequirement::Default` resolves to
    pub(crate) inherited_ready: bool,
}

impl Cx {
    pub(crate) fn top(scope: &Scope) -> Self {
        Cx {
            requester: None,
            inherited_ready: scope.options().ready_by_default,
        }
    }

    pub(crate) fn detached() -> Self {
        Cx {
            requester: None,
            inherited_ready: true,
        }
    }
}

/// Resolves `key` from `scope`
///
/// `Ok(None)` only for optional keys nobody provides.
pub(crate) fn resolve(
    scope: Scope,
    key: Key,
    cx: Cx,
) -> BoxFuture<'static, Result<Option<Instance>, InjectError>> {
    async move {
        if scope.is_closed() {
            return Err(InjectError::ScopeClosed(scope.name().to_string()));
        }
        let Some((registration, found_in)) = scope.lookup(&key)? else {
            if *key.target() == Target::Type(TypeInfo::of::<Scope>()) {
                return Ok(Some(Instance::new(scope)));
            }
            if key.is_optional() {
                tracing::trace!(scope = %scope.name(), key = %key, "optional dependency not provided");
                return Ok(None);
            }
            return Err(InjectError::unsatisfied(&key));
        };

        produce(scope, key, registration, found_in, cx).await
    }
    .boxed()
}

/// Resolves `key` through the registration `found_in` holds for exactly that key
///
/// Used where the registering scope is already known, so a nearer or more specific match
/// cannot stand in for it.
pub(crate) fn resolve_registered(
    scope: Scope,
    found_in: Scope,
    key: Key,
    cx: Cx,
) -> BoxFuture<'static, Result<Option<Instance>, InjectError>> {
    async move {
        if scope.is_closed() {
            return Err(InjectError::ScopeClosed(scope.name().to_string()));
        }
        let registration = found_in
            .registration(&key)
            .ok_or_else(|| InjectError::unsatisfied(&key))?;
        produce(scope, key, registration, found_in, cx).await
    }
    .boxed()
}

/// Obtains an instance from `registration`, found in `found_in` for a request made in `scope`
async fn produce(
    scope: Scope,
    key: Key,
    registration: Arc<Registration>,
    found_in: Scope,
    cx: Cx,
) -> Result<Option<Instance>, InjectError> {
    let want_ready = key.ready().effective(cx.inherited_ready);
    let instance = match &registration.producer {
        Producer::Value(instance) => instance.clone(),
        Producer::Xref {
            scope: target_scope,
            key: target,
        } => {
            let target_scope = target_scope.upgrade().ok_or_else(|| {
                InjectError::ScopeClosed(format!("target of {}", registration.primary))
            })?;
            let cx = Cx {
                requester: cx.requester.clone(),
                inherited_ready: want_ready,
            };
            return resolve(target_scope, target.clone().with_ready(key.ready()), cx)
                .await
                .map_err(|error| error.within(&key));
        }
        Producer::Factory(factory) => {
            let owner = if registration.allow_multiple {
                scope.clone()
            } else {
                found_in
            };
            memoized(
                owner,
                registration.clone(),
                factory.clone(),
                cx.requester.clone(),
                want_ready,
            )
            .await?
        }
    };

    if want_ready {
        ensure_ready(instance.clone(), cx.requester.clone()).await?;
    }
    Ok(Some(instance))
}

/// Returns the cached instance of `registration` in `owner`, constructing it at most once
async fn memoized(
    owner: Scope,
    registration: Arc<Registration>,
    factory: Arc<dyn DynFactory>,
    requester: Option<Requester>,
    want_ready: bool,
) -> Result<Instance, InjectError> {
    let target = Requester {
        node: Node {
            scope: owner.id(),
            slot: registration.id,
        },
        key: registration.primary.clone(),
    };

    let construction = {
        let mut state = owner.state();
        if state.closed {
            return Err(InjectError::ScopeClosed(owner.name().to_string()));
        }

        let in_flight = match state.slots.get(&registration.id) {
            Some(Slot::Built { instance, .. }) => return Ok(instance.clone()),
            Some(Slot::Constructing { future, .. }) => future.upgrade(),
            None => None,
        };

        match in_flight {
            Some(construction) => construction,
            // Nothing cached, or every waiter of an earlier attempt went away
            None => {
                let generation = owner.runtime().next_id();
                let (future, abort) = abortable(construct(
                    owner.clone(),
                    registration.clone(),
                    factory,
                    target.clone(),
                    want_ready,
                    generation,
                ));
                let scope_name = owner.name().to_string();
                let future: ConstructFuture = future
                    .map(move |result| match result {
                        Ok(result) => result,
                        Err(Aborted) => Err(InjectError::ScopeClosed(scope_name)),
                    })
                    .boxed();
                let construction = future.shared();

                if let Some(weak) = construction.downgrade() {
                    state.slots.insert(
                        registration.id,
                        Slot::Constructing {
                            future: weak,
                            abort,
                            generation,
                        },
                    );
                }
                construction
            }
        }
    };

    let _edge = match &requester {
        Some(requester) => Some(owner.runtime().waits.wait_on(requester, &target)?),
        None => None,
    };
    construction.await
}

async fn construct(
    owner: Scope,
    registration: Arc<Registration>,
    factory: Arc<dyn DynFactory>,
    me: Requester,
    want_ready: bool,
    generation: u64,
) -> Result<Instance, InjectError> {
    tracing::debug!(scope = %owner.name(), key = %me.key, "constructing");

    let cx = Cx {
        requester: Some(me.clone()),
        inherited_ready: want_ready,
    };
    let result = build(
        &owner,
        factory.as_ref(),
        Arguments::new(),
        &cx,
        &me.key,
        Some(&registration),
    )
    .await;

    let instance = match result {
        Ok(instance) => instance,
        Err(error) => {
            {
                let mut state = owner.state();
                let current = matches!(
                    state.slots.get(&registration.id),
                    Some(Slot::Constructing { generation: attempt, .. }) if *attempt == generation
                );
                if current {
                    state.slots.remove(&registration.id);
                }
            }
            report_failure(&owner, Some(&registration), &error);
            return Err(error);
        }
    };

    instance.set_origin(Origin {
        scope: owner.downgrade(),
        node: me.node,
        key: me.key.clone(),
        registration: Some(Arc::downgrade(&registration)),
    });

    let stored = {
        let mut state = owner.state();
        if !state.closed {
            state.slots.insert(
                registration.id,
                Slot::Built {
                    instance: instance.clone(),
                    registration: registration.clone(),
                },
            );
        }
        !state.closed
    };
    if !stored {
        if !registration.no_close {
            let _ = instance.release();
        }
        return Err(InjectError::ScopeClosed(owner.name().to_string()));
    }

    tracing::debug!(scope = %owner.name(), key = %me.key, state = ?instance.ready_state(), "constructed");
    owner.emit(&registration, EventPayload::Progress(Milestone::Constructed));
    if instance.is_ready() {
        owner.emit(&registration, EventPayload::Final(instance.clone()));
    }

    Ok(instance)
}

/// Resolves the missing arguments of `factory` and calls it
async fn build(
    scope: &Scope,
    factory: &dyn DynFactory,
    explicit: Arguments,
    cx: &Cx,
    key: &Key,
    registration: Option<&Arc<Registration>>,
) -> Result<Instance, InjectError> {
    let dependencies = factory.dependencies();
    let (arguments, injected) =
        resolve_arguments(scope, &dependencies, explicit, cx, registration)
            .await
            .map_err(|error| error.within(key))?;

    let instance = factory
        .construct(arguments)
        .await
        .map_err(|error| InjectError::construction(key, error))?;
    instance.record_dependencies(injected);

    Ok(instance)
}

/// Resolves every declared dependency missing from `arguments` concurrently
///
/// The first failure drops (and with that cancels) the remaining resolutions.
async fn resolve_arguments(
    scope: &Scope,
    dependencies: &Dependencies,
    mut arguments: Arguments,
    cx: &Cx,
    registration: Option<&Arc<Registration>>,
) -> Result<(Arguments, Vec<(Key, Instance)>), InjectError> {
    let mut pending = Vec::new();
    for dependency in dependencies.iter() {
        if arguments.contains(&dependency.name) {
            continue;
        }
        if dependency.key.is_deferred() {
            let handle = DeferredHandle::new(scope, dependency.key.clone(), cx.clone());
            arguments.insert(dependency.name.clone(), Argument::Deferred(handle));
            continue;
        }

        let name = dependency.name.clone();
        let key = dependency.key.clone();
        let progress = registration.map(|registration| (scope.clone(), registration.clone()));
        pending.push(
            resolve(scope.clone(), key.clone(), cx.clone()).map(move |result| {
                let resolved = result?;
                if let Some((scope, registration)) = progress {
                    scope.emit(
                        &registration,
                        EventPayload::Progress(Milestone::DependencyResolved(key.plain())),
                    );
                }
                Ok::<_, InjectError>((name, key, resolved))
            }),
        );
    }

    let mut injected = Vec::new();
    for (name, key, resolved) in try_join_all(pending).await? {
        match resolved {
            Some(instance) => {
                injected.push((key, instance.clone()));
                arguments.insert(name, Argument::Instance(instance));
            }
            None => arguments.insert(name, Argument::Absent),
        }
    }

    Ok((arguments, injected))
}

/// Brings `instance` to `Ready`, sharing one readiness drive between all callers
pub(crate) fn ensure_ready(
    instance: Instance,
    requester: Option<Requester>,
) -> BoxFuture<'static, Result<(), InjectError>> {
    async move {
        let (drive, target, scope) = {
            let mut lifecycle = instance.lifecycle();
            if lifecycle.state == ReadyState::Ready {
                return Ok(());
            }

            let Some(origin) = lifecycle.origin.clone() else {
                return Err(InjectError::readiness(
                    &Key::new(Target::Type(instance.info())),
                    "instance is not attached to a scope".into(),
                ));
            };
            if lifecycle.state == ReadyState::Closed {
                return Err(InjectError::readiness(
                    &origin.key,
                    "instance is closed".into(),
                ));
            }
            let Some(scope) = origin.scope.upgrade() else {
                return Err(InjectError::ScopeClosed(format!("owner of {}", origin.key)));
            };

            let target = Requester {
                node: origin.node,
                key: origin.key.clone(),
            };
            let drive = match lifecycle.drive.as_ref().and_then(WeakShared::upgrade) {
                Some(drive) => drive,
                None => {
                    let drive: ReadyFuture =
                        drive_ready(instance.clone(), origin, scope.clone()).boxed();
                    let drive = drive.shared();
                    lifecycle.drive = drive.downgrade();
                    drive
                }
            };
            (drive, target, scope)
        };

        let _edge = match &requester {
            Some(requester) => Some(scope.runtime().waits.wait_on(requester, &target)?),
            None => None,
        };
        drive.await
    }
    .boxed()
}

async fn drive_ready(instance: Instance, origin: Origin, scope: Scope) -> Result<(), InjectError> {
    let me = Requester {
        node: origin.node,
        key: origin.key.clone(),
    };
    let registration = origin.registration.as_ref().and_then(Weak::upgrade);

    // Dependencies first, unless they were explicitly requested not ready
    let dependencies = instance.lifecycle().dependencies.clone();
    let pending = dependencies
        .into_iter()
        .filter(|(key, _)| key.ready() != ReadyRequirement::NotReady)
        .map(|(_, dependency)| ensure_ready(dependency, Some(me.clone())));
    try_join_all(pending)
        .await
        .map_err(|error| error.within(&origin.key))?;

    let hooks = instance.hooks().cloned();
    if let Some(ready) = hooks.as_ref().and_then(|hooks| hooks.ready_hook()) {
        if let Some(registration) = &registration {
            scope.emit(registration, EventPayload::Progress(Milestone::ReadyHookEntered));
        }
        tracing::debug!(scope = %scope.name(), key = %origin.key, "running readiness hook");

        let cx = ReadyContext {
            scope: scope.clone(),
            requester: me.clone(),
        };
        if let Err(error) = ready.async_ready(cx).await {
            let error = InjectError::readiness(&origin.key, error);
            fail_readiness(&instance, &scope, &origin, registration.as_ref(), &error);
            return Err(error);
        }
    }

    instance.advance(ReadyState::Ready);
    tracing::debug!(scope = %scope.name(), key = %origin.key, "ready");
    if let Some(registration) = &registration {
        scope.emit(registration, EventPayload::Final(instance.clone()));
    }

    Ok(())
}

/// Leaves a failed instance closed and out of the cache, so the next request starts over
fn fail_readiness(
    instance: &Instance,
    scope: &Scope,
    origin: &Origin,
    registration: Option<&Arc<Registration>>,
    error: &InjectError,
) {
    {
        let mut state = scope.state();
        let cached = matches!(
            state.slots.get(&origin.node.slot),
            Some(Slot::Built { instance: cached, .. }) if Instance::ptr_eq(cached, instance)
        );
        if cached {
            state.slots.remove(&origin.node.slot);
        }
    }

    if registration.is_some_and(|registration| registration.no_close) {
        instance.advance(ReadyState::Closed);
    } else if let Err(release_error) = instance.release() {
        tracing::warn!(key = %origin.key, error = %release_error, "releasing an instance that failed to become ready failed");
    }

    report_failure(scope, registration, error);
}

fn report_failure(scope: &Scope, registration: Option<&Arc<Registration>>, error: &InjectError) {
    // Failures are logged where they originate, requesters further up only trace them
    let originates_here = match error {
        InjectError::UnsatisfiedDependency { path, .. } => path.len() <= 2,
        InjectError::ConstructionFailed { path, .. } | InjectError::ReadinessFailed { path, .. } => {
            path.len() <= 1
        }
        _ => false,
    };

    if originates_here && scope.options().log_failures {
        tracing::error!(scope = %scope.name(), %error, "dependency failed");
    } else {
        tracing::debug!(scope = %scope.name(), %error, "dependency failed");
    }

    if let Some(registration) = registration {
        scope.emit(registration, EventPayload::Failed(error.clone()));
    }
}

impl Scope {
    /// Resolves `key`, constructing it and bringing it to the requested readiness as needed
    ///
    /// The optional flag of `key` is ignored, use [`Scope::get_optional_async`] for that.
    pub async fn get_instance_async(&self, key: &Key) -> Result<Instance, InjectError> {
        resolve(self.clone(), key.clone(), Cx::top(self))
            .await?
            .ok_or_else(|| InjectError::unsatisfied(key))
    }

    /// Resolves `key`, `None` if nothing provides it
    pub async fn get_optional_async(&self, key: &Key) -> Result<Option<Instance>, InjectError> {
        resolve(self.clone(), key.clone().optional(), Cx::top(self)).await
    }

    /// Synchronous [`Scope::get_instance_async`]
    ///
    /// Fails with [`InjectError::AsyncRequired`] if anything on the way has to wait. The
    /// abandoned attempt leaves no half constructed cache entry behind.
    pub fn get_instance(&self, key: &Key) -> Result<Instance, InjectError> {
        self.get_instance_async(key)
            .now_or_never()
            .unwrap_or_else(|| Err(InjectError::AsyncRequired { key: key.plain() }))
    }

    /// Synchronous [`Scope::get_optional_async`]
    pub fn get_optional(&self, key: &Key) -> Result<Option<Instance>, InjectError> {
        self.get_optional_async(key)
            .now_or_never()
            .unwrap_or_else(|| Err(InjectError::AsyncRequired { key: key.plain() }))
    }

    pub async fn get<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.get_key::<T>(&Key::of::<T>()).await
    }

    pub async fn get_key<T: Injectable>(&self, key: &Key) -> Result<Arc<T>, InjectError> {
        self.get_instance_async(key).await?.get()
    }

    /// Resolves the registration of `key` with explicit arguments
    ///
    /// Instance arguments are registered under their declared dependency keys in a new child
    /// scope, which also gets its own copy of the registration with every argument bound, so
    /// absent and deferred arguments reach the producer as given. The instance is cached in
    /// and owned by that child, returned alongside it, so every call builds a separate instance
    /// that is closed with its child.
    ///
    /// Fails with [`InjectError::MissingArgument`] for an argument the producer does not
    /// declare. Values and cross references declare none.
    pub async fn get_instance_with(
        &self,
        key: &Key,
        arguments: Arguments,
    ) -> Result<(Instance, Scope), InjectError> {
        let (registration, _) = self
            .lookup(key)?
            .ok_or_else(|| InjectError::unsatisfied(key))?;

        let declared = match &registration.producer {
            Producer::Factory(factory) => factory.dependencies(),
            Producer::Value(_) | Producer::Xref { .. } => Dependencies::new(),
        };
        let mut bindings = Vec::new();
        for (name, argument) in arguments.iter() {
            let dependency = declared
                .get(name)
                .ok_or_else(|| InjectError::MissingArgument(name.to_string()))?;
            if let Argument::Instance(instance) = argument {
                bindings.push((dependency.key.plain(), instance.clone()));
            }
        }

        let child = self.child(format!("{}/{}", self.name(), key))?;
        let result = async {
            for (dependency, instance) in bindings {
                child.add_provider(Provider::instance(dependency, instance).no_close().quiet())?;
            }

            if let Producer::Factory(factory) = &registration.producer {
                child.add_provider(Provider {
                    primary: registration.primary.clone(),
                    keys: registration.keys.clone(),
                    producer: Producer::Factory(Arc::new(Bound {
                        factory: factory.clone(),
                        arguments,
                    })),
                    allow_multiple: false,
                    no_close: registration.no_close,
                    quiet: registration.quiet,
                })?;
            }
            child.get_instance_async(key).await
        }
        .await;

        match result {
            Ok(instance) => Ok((instance, child)),
            Err(error) => {
                if let Err(teardown) = child.close() {
                    tracing::warn!(%teardown, "closing the argument scope failed");
                }
                Err(error)
            }
        }
    }

    /// Calls `factory` with its dependencies resolved from this scope
    ///
    /// `arguments` take precedence over declared dependencies. The result is neither cached
    /// nor closed with the scope.
    pub async fn instantiate(
        &self,
        factory: &dyn DynFactory,
        arguments: Arguments,
    ) -> Result<Instance, InjectError> {
        let key = Key::new(Target::Type(factory.supplies()));
        let me = Requester {
            node: Node {
                scope: self.id(),
                slot: self.runtime().next_id(),
            },
            key: key.clone(),
        };
        let cx = Cx {
            requester: Some(me.clone()),
            inherited_ready: self.options().ready_by_default,
        };

        let instance = build(self, factory, arguments, &cx, &key, None).await?;
        instance.set_origin(Origin {
            scope: self.downgrade(),
            node: me.node,
            key,
            registration: None,
        });

        if cx.inherited_ready {
            ensure_ready(instance.clone(), None).await?;
        }
        Ok(instance)
    }

    /// Typed [`Scope::instantiate`]
    pub async fn call<F: InstanceFactory>(
        &self,
        factory: &F,
        arguments: Arguments,
    ) -> Result<Arc<F::Provides>, InjectError> {
        self.instantiate(factory, arguments).await?.get()
    }

    /// Brings an instance obtained with `ReadyRequirement::NotReady` to `Ready`
    ///
    /// A no-op for instances that are ready already.
    pub async fn make_ready(&self, instance: &Instance) -> Result<(), InjectError> {
        ensure_ready(instance.clone(), None).await
    }
}

/// A factory with some of its arguments fixed up front
struct Bound {
    factory: Arc<dyn DynFactory>,
    arguments: Arguments,
}

impl DynFactory for Bound {
    fn supplies(&self) -> TypeInfo {
        self.factory.supplies()
    }

    fn dependencies(&self) -> Dependencies {
        let mut dependencies = self.factory.dependencies();
        dependencies.retain(|dependency| !self.arguments.contains(&dependency.name));
        dependencies
    }

    fn construct(&self, resolved: Arguments) -> BoxFuture<'_, Result<Instance, DynError>> {
        let mut arguments = self.arguments.clone();
        for (name, argument) in resolved.iter() {
            arguments.insert(name, argument.clone());
        }
        self.factory.construct(arguments)
    }
}

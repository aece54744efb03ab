//! Stack interpreter for class code
//!
//! Runs the straight-line method bodies produced by the enhancer: constructor
//! patches, accessors, timeout dispatchers, cleanup methods, EJB 2.1 helpers
//! and no-interface forwarding. Methods without code are dispatched to the
//! instance's [`BeanBody`].
//!
//! The interpreter never panics on malformed code; every fault surfaces as a
//! `java.lang.VerifyError` throwable.

use std::cell::Cell;
use std::sync::Arc;

use ezb_sdk::descriptor::parse_method_descriptor;
use ezb_sdk::{names, CallerIdentity, MethodDescriptor, Throwable, TypeDesc, Value};
use rustc_hash::FxHashMap;

use crate::classfile::{Insn, MethodDef};
use crate::invocation::remap;

use super::instance::{BeanBody, BodyCall, Instance, ObjectRef, Slot};
use super::loader::{BeanClassLoader, LoadedClass};

/// Maximum nesting of interpreted calls
pub const MAX_CALL_DEPTH: usize = 64;

/// Services the interpreter cannot provide itself
///
/// The server side is backed by a bean factory, the client side by the
/// no-interface view.
pub trait Host {
    /// Construct an object of a class the loader does not define
    fn construct(&self, class: &str) -> Result<Slot, Throwable>;

    /// Run a static helper
    fn invoke_static(
        &self,
        interpreter: &Interpreter<'_>,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable>;

    /// Forward a call through the receiver's invocation handler
    fn invoke_handler(
        &self,
        receiver: &ObjectRef,
        method: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<Value, Throwable>;
}

fn null_pointer(what: &str) -> Throwable {
    Throwable::runtime("java.lang.NullPointerException", what)
}

fn stack_overflow(depth: usize) -> Throwable {
    Throwable::new(
        "java.lang.StackOverflowError",
        vec![
            "java.lang.VirtualMachineError".to_string(),
            names::ERROR.to_string(),
            names::THROWABLE.to_string(),
        ],
        Some(format!("Call depth exceeded {}", depth)),
    )
}

fn abstract_method(class: &str, name: &str, descriptor: &str) -> Throwable {
    Throwable::new(
        "java.lang.AbstractMethodError",
        vec![
            "java.lang.IncompatibleClassChangeError".to_string(),
            names::LINKAGE_ERROR.to_string(),
            names::ERROR.to_string(),
            names::THROWABLE.to_string(),
        ],
        Some(format!("{}.{}{} has no code and no bean body", class, name, descriptor)),
    )
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Interpreter bound to a loader and a host
pub struct Interpreter<'a> {
    loader: &'a BeanClassLoader,
    host: &'a dyn Host,
    caller: Option<&'a CallerIdentity>,
    depth: Cell<usize>,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter
    pub fn new(loader: &'a BeanClassLoader, host: &'a dyn Host) -> Self {
        Self {
            loader,
            host,
            caller: None,
            depth: Cell::new(0),
        }
    }

    /// Attach the caller visible to bean bodies
    pub fn with_caller(mut self, caller: Option<&'a CallerIdentity>) -> Self {
        self.caller = caller;
        self
    }

    /// Loader in use
    pub fn loader(&self) -> &BeanClassLoader {
        self.loader
    }

    /// Allocate an instance of `class_name` and run its no-argument constructor
    pub fn instantiate(
        &self,
        class_name: &str,
        body: Option<Arc<dyn BeanBody>>,
    ) -> Result<ObjectRef, Throwable> {
        let class = self.loader.class(class_name).ok_or_else(|| {
            Throwable::of(
                names::LINKAGE_ERROR,
                format!("Class {} is not defined in loader {}", class_name, self.loader.name()),
            )
        })?;

        let mut fields = FxHashMap::default();
        for ancestor in self.loader.superclass_chain(&class).iter().rev() {
            for field in &ancestor.file().fields {
                fields.insert(field.name.clone(), Slot::default_for(&field.ty));
            }
        }

        let instance = Arc::new(Instance::new(class, fields, body));
        self.invoke_special(&instance, class_name, "<init>", "()V", Vec::new())?;
        Ok(instance)
    }

    /// Virtual call: resolve `name` on the receiver's class
    pub fn invoke(
        &self,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        let resolved = self.loader.resolve_method(receiver.class(), name, descriptor);
        match resolved {
            Some(resolved) => self.call(receiver, resolved.method(), &resolved.class, args),
            None => self.dispatch_to_body(receiver, name, descriptor, args),
        }
    }

    /// Virtual call with plain values
    pub fn invoke_values(
        &self,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value, Throwable> {
        let args = args.into_iter().map(Slot::from_value).collect();
        self.invoke(receiver, name, descriptor, args)?.into_value()
    }

    /// Non-virtual call: resolve starting at `owner`
    ///
    /// A constructor of a class outside the loader (the root of the
    /// hierarchy) does nothing.
    pub fn invoke_special(
        &self,
        receiver: &ObjectRef,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        let resolved = self
            .loader
            .class(owner)
            .and_then(|class| self.loader.resolve_method(&class, name, descriptor));
        match resolved {
            Some(resolved) => self.call(receiver, resolved.method(), &resolved.class, args),
            None if name == "<init>" => Ok(Slot::Null),
            None => self.dispatch_to_body(receiver, name, descriptor, args),
        }
    }

    fn enter(&self) -> Result<DepthGuard<'_>, Throwable> {
        let depth = self.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(stack_overflow(MAX_CALL_DEPTH));
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard(&self.depth))
    }

    fn call(
        &self,
        receiver: &ObjectRef,
        method: &MethodDef,
        declaring: &Arc<LoadedClass>,
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        match &method.code {
            Some(code) => {
                let _guard = self.enter()?;
                self.execute(receiver, method, code, args)
            }
            None => {
                let descriptor = method.descriptor();
                if receiver.body().is_none() {
                    return Err(abstract_method(declaring.name(), &method.name, &descriptor));
                }
                self.dispatch_to_body(receiver, &method.name, &descriptor, args)
            }
        }
    }

    fn dispatch_to_body(
        &self,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        let body = receiver
            .body()
            .ok_or_else(|| abstract_method(receiver.class_name(), name, descriptor))?;
        let _guard = self.enter()?;
        let args = args
            .into_iter()
            .map(Slot::into_value)
            .collect::<Result<Vec<_>, _>>()?;
        let mut call = BodyCall {
            method: name,
            descriptor,
            args,
            instance: receiver,
            caller: self.caller,
        };
        body.invoke(&mut call).map(Slot::from_value)
    }

    fn execute(
        &self,
        receiver: &ObjectRef,
        method: &MethodDef,
        code: &[Insn],
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        let label = || format!("{}{}", method.name, method.descriptor());
        let fault = |what: &str| Throwable::verify_error(format!("{} in {}", what, label()));
        let mut stack: Vec<Slot> = Vec::with_capacity(8);

        macro_rules! pop {
            () => {
                stack.pop().ok_or_else(|| fault("Operand stack underflow"))?
            };
        }

        for insn in code {
            match insn {
                Insn::Nop => {}
                Insn::Pop => {
                    pop!();
                }
                Insn::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| fault("Dup on empty stack"))?;
                    stack.push(top);
                }
                Insn::ConstNull => stack.push(Slot::Null),
                Insn::ConstBool(b) => stack.push(Slot::Value(Value::Bool(*b))),
                Insn::ConstInt(v) => stack.push(Slot::Value(Value::Int(*v))),
                Insn::ConstLong(v) => stack.push(Slot::Value(Value::Long(*v))),
                Insn::ConstDouble(v) => stack.push(Slot::Value(Value::Double(*v))),
                Insn::ConstString(s) => stack.push(Slot::Value(Value::Str(s.clone()))),
                Insn::LoadThis => stack.push(Slot::Object(receiver.clone())),
                Insn::LoadArg(index) => {
                    let arg = args
                        .get(*index as usize)
                        .cloned()
                        .ok_or_else(|| fault("Argument index out of range"))?;
                    stack.push(arg);
                }
                Insn::GetField { name, .. } => {
                    let object = pop!();
                    match object {
                        Slot::Object(object) => stack.push(object.field(name)),
                        Slot::Null => return Err(null_pointer(&format!("Reading field {}", name))),
                        _ => return Err(fault("Field read on a non-object")),
                    }
                }
                Insn::PutField { name, .. } => {
                    let value = pop!();
                    match pop!() {
                        Slot::Object(object) => object.set_field(name, value),
                        Slot::Null => return Err(null_pointer(&format!("Writing field {}", name))),
                        _ => return Err(fault("Field write on a non-object")),
                    }
                }
                Insn::New { class } => {
                    let object = if self.loader.contains(class) {
                        Slot::Object(self.instantiate(class, None)?)
                    } else {
                        self.host.construct(class)?
                    };
                    stack.push(object);
                }
                Insn::InvokeVirtual { name, desc, .. } => {
                    let (call_args, ret) = self.pop_call(&mut stack, desc, &fault)?;
                    let target = self.pop_receiver(&mut stack, name, &fault)?;
                    let result = self.invoke(&target, name, desc, call_args)?;
                    if !ret.is_void() {
                        stack.push(result);
                    }
                }
                Insn::InvokeSpecial { owner, name, desc } => {
                    let (call_args, ret) = self.pop_call(&mut stack, desc, &fault)?;
                    let target = self.pop_receiver(&mut stack, name, &fault)?;
                    let result = self.invoke_special(&target, owner, name, desc, call_args)?;
                    if !ret.is_void() {
                        stack.push(result);
                    }
                }
                Insn::InvokeStatic { owner, name, desc } => {
                    let (call_args, ret) = self.pop_call(&mut stack, desc, &fault)?;
                    let result = self.host.invoke_static(self, owner, name, desc, call_args)?;
                    if !ret.is_void() {
                        stack.push(result);
                    }
                }
                Insn::InvokeHandler {
                    declaring,
                    name,
                    desc,
                } => {
                    let (call_args, ret) = self.pop_call(&mut stack, desc, &fault)?;
                    let target = self.pop_receiver(&mut stack, name, &fault)?;
                    let mut forwarded = MethodDescriptor::parse(declaring.clone(), name.clone(), desc)
                        .map_err(|e| fault(&e.to_string()))?;
                    forwarded.exceptions = method.exceptions.clone();
                    let values = call_args
                        .into_iter()
                        .map(Slot::into_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    let result = self
                        .host
                        .invoke_handler(&target, &forwarded, values)
                        .map_err(|t| remap::rethrow_from_proxy(t, &method.exceptions))?;
                    if !ret.is_void() {
                        stack.push(Slot::from_value(result));
                    }
                }
                Insn::Throw { class, message } => {
                    return Err(Throwable::of(class, message.clone()));
                }
                Insn::Return => return Ok(Slot::Null),
                Insn::ReturnValue => return Ok(pop!()),
            }
        }

        Err(fault("Execution fell off the end of the code"))
    }

    fn pop_call(
        &self,
        stack: &mut Vec<Slot>,
        descriptor: &str,
        fault: &dyn Fn(&str) -> Throwable,
    ) -> Result<(Vec<Slot>, TypeDesc), Throwable> {
        let (params, ret) = parse_method_descriptor(descriptor).map_err(|e| fault(&e.to_string()))?;
        if stack.len() < params.len() {
            return Err(fault("Operand stack underflow"));
        }
        let args = stack.split_off(stack.len() - params.len());
        Ok((args, ret))
    }

    fn pop_receiver(
        &self,
        stack: &mut Vec<Slot>,
        method: &str,
        fault: &dyn Fn(&str) -> Throwable,
    ) -> Result<ObjectRef, Throwable> {
        match stack.pop() {
            Some(Slot::Object(object)) => Ok(object),
            Some(Slot::Null) => Err(null_pointer(&format!("Calling {} on null", method))),
            Some(_) => Err(fault("Call on a non-object receiver")),
            None => Err(fault("Operand stack underflow")),
        }
    }
}

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use action::Function2Flags;
use indexmap::IndexMap;

use crate::value::Value;

pub type ObjectRef = Rc<RefCell<ObjectData>>;

const PROTO_CHAIN_LIMIT: usize = 256;

/// Bytecode-backed function. The body range indexes into the script that
/// defined it.
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: String,
    pub script: Rc<[u8]>,
    pub body: Range<usize>,
    pub params: Vec<(u8, String)>,
    pub register_count: u8,
    pub flags: Function2Flags,
    pub function2: bool,
}

#[derive(Debug)]
pub enum ObjectKind {
    Plain,
    Array(Vec<Value>),
    Function(FunctionData),
}

#[derive(Debug)]
pub struct ObjectData {
    pub kind: ObjectKind,
    pub properties: IndexMap<String, Value>,
    pub proto: Option<ObjectRef>,
    /// Interface prototypes declared for this prototype object.
    pub interfaces: Vec<ObjectRef>,
}

impl ObjectData {
    pub fn new_object() -> ObjectRef {
        Rc::new(RefCell::new(ObjectData {
            kind: ObjectKind::Plain,
            properties: IndexMap::new(),
            proto: None,
            interfaces: Vec::new(),
        }))
    }

    pub fn new_array(elements: Vec<Value>) -> ObjectRef {
        Rc::new(RefCell::new(ObjectData {
            kind: ObjectKind::Array(elements),
            properties: IndexMap::new(),
            proto: None,
            interfaces: Vec::new(),
        }))
    }

    /// Creates a function object carrying its own `prototype`, whose
    /// `constructor` points back at the function.
    pub fn new_function(function: FunctionData) -> ObjectRef {
        let object = Rc::new(RefCell::new(ObjectData {
            kind: ObjectKind::Function(function),
            properties: IndexMap::new(),
            proto: None,
            interfaces: Vec::new(),
        }));
        let prototype = ObjectData::new_object();
        prototype
            .borrow_mut()
            .properties
            .insert("constructor".to_string(), Value::Object(object.clone()));
        object
            .borrow_mut()
            .properties
            .insert("prototype".to_string(), Value::Object(prototype));
        object
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    pub fn function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(function) => Some(function),
            _ => None,
        }
    }
}

/// Member lookup: array internals first, then own properties, then the
/// prototype chain. Proto chains are script-constructible, so the walk is
/// bounded.
pub fn get_member(object: &ObjectRef, name: &str) -> Option<Value> {
    let mut current = object.clone();
    for _ in 0..PROTO_CHAIN_LIMIT {
        let proto = {
            let data = current.borrow();
            if let ObjectKind::Array(elements) = &data.kind {
                if name == "length" {
                    return Some(Value::F32(elements.len() as f32));
                }
                if let Ok(index) = name.parse::<usize>() {
                    return Some(elements.get(index).cloned().unwrap_or(Value::Undefined));
                }
            }
            if name == "__proto__" {
                return data.proto.clone().map(Value::Object);
            }
            if let Some(value) = data.properties.get(name) {
                return Some(value.clone());
            }
            data.proto.clone()?
        };
        current = proto;
    }
    None
}

pub fn set_member(object: &ObjectRef, name: &str, value: Value) {
    let mut data = object.borrow_mut();
    if let ObjectKind::Array(elements) = &mut data.kind {
        if name == "length" {
            let length = crate::coerce::to_f64(&value) as u32 as usize;
            elements.resize(length, Value::Undefined);
            return;
        }
        if let Ok(index) = name.parse::<usize>() {
            if index >= elements.len() {
                elements.resize(index + 1, Value::Undefined);
            }
            elements[index] = value;
            return;
        }
    }
    if name == "__proto__" {
        data.proto = match value {
            Value::Object(proto) => Some(proto),
            _ => None,
        };
        return;
    }
    data.properties.insert(name.to_string(), value);
}

pub fn delete_member(object: &ObjectRef, name: &str) -> bool {
    let mut data = object.borrow_mut();
    if let ObjectKind::Array(elements) = &mut data.kind {
        if let Ok(index) = name.parse::<usize>() {
            if index < elements.len() {
                elements[index] = Value::Undefined;
                return true;
            }
        }
    }
    data.properties.shift_remove(name).is_some()
}

/// Own enumerable names in insertion order, array indices first.
pub fn own_keys(object: &ObjectRef) -> Vec<String> {
    let data = object.borrow();
    let mut keys = Vec::new();
    if let ObjectKind::Array(elements) = &data.kind {
        keys.extend((0..elements.len()).map(|i| i.to_string()));
    }
    keys.extend(data.properties.keys().cloned());
    keys
}

/// Walks the prototype chain of `object` looking for the constructor's
/// `prototype`, accepting declared interfaces along the way.
pub fn instance_of(object: &ObjectRef, constructor: &ObjectRef) -> bool {
    let Some(Value::Object(target)) = get_member(constructor, "prototype") else {
        return false;
    };
    let mut current = object.borrow().proto.clone();
    for _ in 0..PROTO_CHAIN_LIMIT {
        let Some(proto) = current else {
            return false;
        };
        if Rc::ptr_eq(&proto, &target) {
            return true;
        }
        {
            let data = proto.borrow();
            if data.interfaces.iter().any(|i| Rc::ptr_eq(i, &target)) {
                return true;
            }
        }
        current = proto.borrow().proto.clone();
    }
    false
}

//! Injection of externally owned values into a flow.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::SetupError;
use crate::node::{Contract, ModeId, Node, NodeCaps, NodeSetup, WorkerOutputs};
use crate::resource::{ResourceName, TypeDesc, Value};

/// Mutable handle of one [`Injector`] output slot.
///
/// The slot stays writable after the plan is assembled; a dataset walker
/// stores the current sample into its bindings before every run of a nested
/// plan.
#[derive(Clone)]
pub struct Binding {
    slot: Rc<RefCell<Value>>,
}

impl Binding {
    /// Replace the bound value.
    pub fn set(&self, value: Value) {
        *self.slot.borrow_mut() = value;
    }

    /// Replace the bound value with a freshly wrapped one.
    pub fn store<T: 'static>(&self, value: T) {
        self.set(Rc::new(value));
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Binding(..)")
    }
}

#[derive(derivative::Derivative)]
#[derivative(Debug)]
struct Slot {
    name: ResourceName,
    #[derivative(Debug = "ignore")]
    value: Rc<RefCell<Value>>,
    ty: TypeDesc,
}

/// Node whose modes require nothing and provide fixed named values.
///
/// Each mode is a dictionary of `{name: value}`; the worker yields the
/// values currently bound, so the caller may mutate them between runs
/// through [`Binding`] handles.
#[derive(Debug, Default)]
pub struct Injector {
    contracts: Vec<Contract>,
    modes: Vec<Vec<Slot>>,
}

impl Injector {
    /// Create an injector with no modes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mode providing the given values. Type descriptors are derived
    /// from the values themselves.
    pub fn with_mode<N>(self, values: impl IntoIterator<Item = (N, Value)>) -> Self
    where
        N: Into<ResourceName>,
    {
        self.with_typed_mode(values.into_iter().map(|(name, value)| {
            let ty = TypeDesc::of_value(&value);
            (name, value, ty)
        }))
    }

    /// Add a mode providing the given values with explicit type
    /// descriptors.
    pub fn with_typed_mode<N>(
        mut self,
        values: impl IntoIterator<Item = (N, Value, TypeDesc)>,
    ) -> Self
    where
        N: Into<ResourceName>,
    {
        let slots: Vec<Slot> = values
            .into_iter()
            .map(|(name, value, ty)| Slot {
                name: name.into(),
                value: Rc::new(RefCell::new(value)),
                ty,
            })
            .collect();
        self.contracts.push(Contract {
            requires: Vec::new(),
            provides: slots.iter().map(|slot| slot.name.clone()).collect(),
        });
        self.modes.push(slots);
        self
    }

    /// Handle of the first slot bound to `name`, across all modes.
    pub fn binding(&self, name: &str) -> Option<Binding> {
        self.modes
            .iter()
            .flat_map(|slots| slots.iter())
            .find(|slot| slot.name.as_str() == name)
            .map(|slot| Binding {
                slot: slot.value.clone(),
            })
    }
}

impl Node for Injector {
    fn capabilities(&self) -> NodeCaps {
        NodeCaps::STATIC
    }

    fn static_contracts(&self) -> &[Contract] {
        &self.contracts
    }

    fn get_contract(&self, mode: ModeId) -> &Contract {
        &self.contracts[mode.index()]
    }

    fn setup(
        &mut self,
        mode: ModeId,
        _input_types: &[TypeDesc],
        _output_mask: &[bool],
    ) -> Result<NodeSetup, SetupError> {
        let slots = self
            .modes
            .get(mode.index())
            .ok_or(SetupError::UnknownMode(mode))?;
        let output_types: Vec<TypeDesc> = slots.iter().map(|slot| slot.ty.clone()).collect();
        // The output mask is no more than a recommendation here; yielding
        // an already bound value costs nothing.
        let handles: SmallVec<[Rc<RefCell<Value>>; 2]> =
            slots.iter().map(|slot| slot.value.clone()).collect();
        let worker = move |_inputs: &[Value]| {
            Ok(handles
                .iter()
                .map(|handle| Some(handle.borrow().clone()))
                .collect::<WorkerOutputs>())
        };
        Ok(NodeSetup::new(worker, output_types))
    }
}

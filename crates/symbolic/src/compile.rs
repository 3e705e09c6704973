use crate::errors::{Result, SymbolicError};
use crate::expr::{Expr, Op};
use crate::ops::apply;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Calling convention of a compiled function: positional inputs
/// followed by named hyper-parameters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    inputs: Vec<String>,
    hypers: Vec<String>,
}

impl Signature {
    /// Constructor from positional input names and hyper-parameter names
    pub fn new<I, H>(inputs: I, hypers: H) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        H: IntoIterator,
        H::Item: Into<String>,
    {
        Signature {
            inputs: inputs.into_iter().map(Into::into).collect(),
            hypers: hypers.into_iter().map(Into::into).collect(),
        }
    }

    /// Positional input names
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Hyper-parameter names
    pub fn hypers(&self) -> &[String] {
        &self.hypers
    }
}

/// Provider of hyper-parameter values looked up by name
pub trait HyperSource {
    /// Value of the named hyper-parameter if any
    fn hyper_value(&self, name: &str) -> Option<ArrayView1<'_, f64>>;
}

impl HyperSource for BTreeMap<String, Array1<f64>> {
    fn hyper_value(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.get(name).map(|v| v.view())
    }
}

/// A compiled numeric function without side effects
pub trait Function: Send + Sync {
    /// Calling convention
    fn signature(&self) -> &Signature;

    /// Evaluate with positional `inputs` (in signature order) and named `hypers`
    fn call(&self, inputs: &[ArrayView2<f64>], hypers: &dyn HyperSource) -> Result<Array2<f64>>;
}

/// A compiler turning an expression into a callable [`Function`]
pub trait Backend: Send + Sync {
    /// Compile `output` against `signature`, every free variable of `output` must be bound
    fn compile(&self, signature: &Signature, output: &Expr) -> Result<Box<dyn Function>>;

    /// Number of compilations performed so far
    fn compilations(&self) -> usize;
}

#[derive(Debug)]
enum Slot {
    Input(usize),
    Hyper(usize),
    Const(Array2<f64>),
    Apply(Op, Vec<usize>),
}

/// Linearized expression: slots are evaluated in order, each exactly once
#[derive(Debug)]
pub struct Tape {
    signature: Signature,
    slots: Vec<Slot>,
    output: usize,
}

impl Tape {
    /// Number of evaluation slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the tape has no slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Function for Tape {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call(&self, inputs: &[ArrayView2<f64>], hypers: &dyn HyperSource) -> Result<Array2<f64>> {
        if inputs.len() != self.signature.inputs.len() {
            return Err(SymbolicError::InputCount {
                expected: self.signature.inputs.len(),
                got: inputs.len(),
            });
        }
        let mut values: Vec<Array2<f64>> = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter() {
            let value = match slot {
                Slot::Input(i) => inputs[*i].to_owned(),
                Slot::Hyper(i) => {
                    let name = &self.signature.hypers[*i];
                    hypers
                        .hyper_value(name)
                        .ok_or_else(|| SymbolicError::MissingHyper(name.clone()))?
                        .to_owned()
                        .insert_axis(Axis(1))
                }
                Slot::Const(c) => c.clone(),
                Slot::Apply(op, args) => {
                    let operands: Vec<&Array2<f64>> = args.iter().map(|&a| &values[a]).collect();
                    apply(op, &operands)?
                }
            };
            values.push(value);
        }
        Ok(values.swap_remove(self.output))
    }
}

struct Linearizer<'a> {
    signature: &'a Signature,
    slots: Vec<Slot>,
    by_id: HashMap<usize, usize>,
    by_key: HashMap<String, usize>,
}

impl<'a> Linearizer<'a> {
    fn position(names: &[String], name: &str) -> Result<usize> {
        names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| SymbolicError::UnboundVariable(name.to_string()))
    }

    fn push(&mut self, key: String, slot: Slot) -> usize {
        if let Some(&idx) = self.by_key.get(&key) {
            return idx;
        }
        self.slots.push(slot);
        let idx = self.slots.len() - 1;
        self.by_key.insert(key, idx);
        idx
    }

    fn visit(&mut self, expr: &Expr) -> Result<usize> {
        if let Some(&idx) = self.by_id.get(&expr.id()) {
            return Ok(idx);
        }
        let idx = match expr.op() {
            Op::Input(name) => {
                let pos = Self::position(&self.signature.inputs, name)?;
                self.push(format!("Input#{pos}"), Slot::Input(pos))
            }
            Op::Hyper(name) => {
                let pos = Self::position(&self.signature.hypers, name)?;
                self.push(format!("Hyper#{pos}"), Slot::Hyper(pos))
            }
            Op::Const(c) => self.push(expr.op().key(expr.id()), Slot::Const(c.clone())),
            op => {
                let args = expr
                    .args()
                    .iter()
                    .map(|a| self.visit(a))
                    .collect::<Result<Vec<_>>>()?;
                let key = format!("{}{:?}", op.key(expr.id()), args);
                if let Some(&idx) = self.by_key.get(&key) {
                    idx
                } else {
                    let constants: Option<Vec<&Array2<f64>>> = args
                        .iter()
                        .map(|&a| match &self.slots[a] {
                            Slot::Const(c) => Some(c),
                            _ => None,
                        })
                        .collect();
                    match constants {
                        Some(operands) => {
                            let folded = apply(op, &operands)?;
                            self.push(key, Slot::Const(folded))
                        }
                        None => self.push(key, Slot::Apply(op.clone(), args)),
                    }
                }
            }
        };
        self.by_id.insert(expr.id(), idx);
        Ok(idx)
    }
}

/// Drop slots the output does not depend on (constants consumed by folding)
fn prune(slots: Vec<Slot>, output: usize) -> (Vec<Slot>, usize) {
    let mut live = vec![false; slots.len()];
    live[output] = true;
    for i in (0..slots.len()).rev() {
        if let (true, Slot::Apply(_, args)) = (live[i], &slots[i]) {
            args.iter().for_each(|&a| live[a] = true);
        }
    }
    let mut remap = vec![usize::MAX; slots.len()];
    let mut kept = Vec::with_capacity(slots.len());
    for (i, slot) in slots.into_iter().enumerate() {
        if live[i] {
            let slot = match slot {
                Slot::Apply(op, args) => Slot::Apply(op, args.iter().map(|&a| remap[a]).collect()),
                other => other,
            };
            remap[i] = kept.len();
            kept.push(slot);
        }
    }
    (kept, remap[output])
}

/// Default backend compiling expressions to a [`Tape`]
///
/// Structurally identical sub-expressions share one slot, sub-graphs made
/// only of constants are evaluated once at compile time.
#[derive(Debug, Default)]
pub struct TapeBackend {
    count: AtomicUsize,
}

impl TapeBackend {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile to a concrete [`Tape`]
    pub fn compile_tape(&self, signature: &Signature, output: &Expr) -> Result<Tape> {
        let mut linearizer = Linearizer {
            signature,
            slots: vec![],
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        };
        let output = linearizer.visit(output)?;
        let (slots, output) = prune(linearizer.slots, output);
        self.count.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Compiled tape with {} slots for inputs {:?}",
            slots.len(),
            signature.inputs()
        );
        Ok(Tape {
            signature: signature.clone(),
            slots,
            output,
        })
    }
}

impl Backend for TapeBackend {
    fn compile(&self, signature: &Signature, output: &Expr) -> Result<Box<dyn Function>> {
        Ok(Box::new(self.compile_tape(signature, output)?))
    }

    fn compilations(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn hypers(pairs: &[(&str, Array1<f64>)]) -> BTreeMap<String, Array1<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_squared_exponential() {
        let x = Expr::input("x");
        let var = Expr::hyper("var");
        let ls = Expr::hyper("ls");
        let k = &var * (x.sq_dist(&x) / ls.square() * -0.5).exp();

        let backend = TapeBackend::new();
        let sig = Signature::new(["x"], ["ls", "var"]);
        let f = backend.compile(&sig, &k).unwrap();
        let xv = array![[0.], [1.]];
        let h = hypers(&[("var", array![2.]), ("ls", array![1.])]);
        let res = f.call(&[xv.view()], &h).unwrap();
        assert_abs_diff_eq!(res[[0, 0]], 2.);
        assert_abs_diff_eq!(res[[0, 1]], 2. * (-0.5f64).exp(), epsilon = 1e-12);
        assert_eq!(backend.compilations(), 1);
    }

    #[test]
    fn test_unbound_variable() {
        let e = Expr::input("x") + Expr::hyper("a");
        let backend = TapeBackend::new();
        let sig = Signature::new(["x"], Vec::<String>::new());
        assert!(matches!(
            backend.compile(&sig, &e),
            Err(SymbolicError::UnboundVariable(name)) if name == "a"
        ));
        assert_eq!(backend.compilations(), 0);
    }

    #[test]
    fn test_missing_hyper_value() {
        let e = Expr::hyper("a").exp();
        let backend = TapeBackend::new();
        let f = backend
            .compile(&Signature::new(Vec::<String>::new(), ["a"]), &e)
            .unwrap();
        assert!(matches!(
            f.call(&[], &BTreeMap::new()),
            Err(SymbolicError::MissingHyper(_))
        ));
    }

    #[test]
    fn test_shared_and_folded() {
        let x = Expr::input("x");
        // two structurally identical sub-graphs built separately
        let a = x.exp() + x.exp();
        let c = Expr::scalar(2.).ln() * Expr::scalar(3.);
        let e = &a * &c;
        let tape = TapeBackend::new()
            .compile_tape(&Signature::new(["x"], Vec::<String>::new()), &e)
            .unwrap();
        // x, exp(x), add, folded constant, mul
        assert_eq!(tape.len(), 5);
        let res = tape
            .call(&[array![[0.]].view()], &BTreeMap::new())
            .unwrap();
        assert_abs_diff_eq!(res[[0, 0]], 2. * 3. * 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_input_count() {
        let e = Expr::input("x");
        let f = TapeBackend::new()
            .compile(&Signature::new(["x"], Vec::<String>::new()), &e)
            .unwrap();
        assert!(matches!(
            f.call(&[], &BTreeMap::new()),
            Err(SymbolicError::InputCount {
                expected: 1,
                got: 0
            })
        ));
    }
}

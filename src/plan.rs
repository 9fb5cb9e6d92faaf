//! Turns a saved document into a validated training plan.
//!
//! The plan mirrors how the original trainer consumed the document: one
//! hyperparameter block drives a trainer, the optimizer sits at the sink, a
//! single loss feeds it, and the loss takes one model chain and one data
//! branch. Operation names in `func` kwargs resolve against a closed registry
//! instead of being evaluated; unknown names are a configuration error.
//! Executing the plan is the external trainer's job.

use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::{Category, Kwargs, PropertyValue};
use crate::document::{ModelEntry, SaveFile};

/// What a registered operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Layer,
    Loss,
    Optimizer,
    DataSource,
    Preprocess,
    Trainer,
}

/// Closed mapping from operation names (the `func` kwarg) to their kinds.
pub struct Registry {
    ops: HashMap<&'static str, OpKind>,
}

impl Registry {
    pub fn builtin() -> Self {
        let ops = HashMap::from([
            ("torch.nn.Linear", OpKind::Layer),
            ("torch.nn.ReLU", OpKind::Layer),
            ("torch.nn.Sigmoid", OpKind::Layer),
            ("torch.nn.Tanh", OpKind::Layer),
            ("torch.nn.MSELoss", OpKind::Loss),
            ("torch.nn.CrossEntropyLoss", OpKind::Loss),
            ("torch.optim.SGD", OpKind::Optimizer),
            ("torch.optim.Adam", OpKind::Optimizer),
            ("epics_get.get_boston_CRIM", OpKind::DataSource),
            ("epics_get.get_boston_ZN", OpKind::DataSource),
            ("epics_get.get_boston_INDUS", OpKind::DataSource),
            ("epics_get.get_boston_CHAS", OpKind::DataSource),
            ("epics_get.get_boston_NOX", OpKind::DataSource),
            ("epics_get.get_boston_RM", OpKind::DataSource),
            ("epics_get.get_boston_AGE", OpKind::DataSource),
            ("epics_get.get_boston_DIS", OpKind::DataSource),
            ("epics_get.get_boston_RAD", OpKind::DataSource),
            ("epics_get.get_boston_TAX", OpKind::DataSource),
            ("epics_get.get_boston_PTRATIO", OpKind::DataSource),
            ("epics_get.get_boston_B", OpKind::DataSource),
            ("epics_get.get_boston_LSTAT", OpKind::DataSource),
            ("epics_get.get_boston_PRICE", OpKind::DataSource),
            ("cat", OpKind::Preprocess),
            ("DL", OpKind::Trainer),
        ]);
        Self { ops }
    }

    pub fn lookup(&self, name: &str) -> Option<OpKind> {
        self.ops.get(name).copied()
    }
}

/// A registry-validated operation call: the resolved name and its remaining
/// kwargs (everything but `func`).
#[derive(Debug, Clone, PartialEq)]
pub struct OpCall {
    pub op: String,
    pub kind: OpKind,
    pub kwargs: Kwargs,
}

/// A data branch: either a raw source or a preprocess step over its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum DataStep {
    Source(OpCall),
    Preprocess { call: OpCall, inputs: Vec<DataStep> },
}

/// Typed view of the hyperparameter node's kwargs.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperparameters {
    pub trainer: OpCall,
    pub epoch: i64,
    pub batch_size: i64,
    pub shuffle: bool,
    pub gpu: bool,
    pub seed: i64,
    pub model_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub hyperparameters: Hyperparameters,
    pub optimizer: OpCall,
    pub loss: OpCall,
    /// Network layers in forward order (input side first).
    pub layers: Vec<OpCall>,
    /// Branch producing the network input tensor.
    pub input: DataStep,
    /// Branch producing the training target tensor.
    pub target: DataStep,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("no hyperparameter model in the document")]
    NoHyperparameters,
    #[error("more than one hyperparameter model in the document")]
    MultipleHyperparameters,
    #[error("no optimizer model in the document")]
    NoOptimizer,
    #[error("more than one optimizer model in the document")]
    MultipleOptimizers,
    #[error("optimizer `{0}` must have exactly one loss input")]
    WrongOptimizerInputs(String),
    #[error("loss `{0}` must have exactly two inputs: one model chain and one data branch")]
    WrongLossInputs(String),
    #[error("model chain broken at `{0}`: a model needs an upstream model or data input")]
    BrokenModelChain(String),
    #[error("node `{0}` has no `func` property")]
    MissingFunc(String),
    #[error("node `{0}`: `func` must be a string")]
    FuncNotText(String),
    #[error("unknown operation `{name}` on node `{node}`")]
    UnknownOperation { node: String, name: String },
    #[error("operation `{name}` on node `{node}` is not usable as {expected}")]
    WrongOperationKind {
        node: String,
        name: String,
        expected: &'static str,
    },
    #[error("hyperparameter `{0}` is missing")]
    MissingHyperparameter(&'static str),
    #[error("hyperparameter `{key}` has the wrong type, expected {expected}")]
    HyperparameterType { key: &'static str, expected: &'static str },
}

fn op_call(
    entry: &ModelEntry,
    registry: &Registry,
    expected: OpKind,
    expected_name: &'static str,
) -> Result<OpCall, PlanError> {
    let func = entry
        .kwargs
        .get("func")
        .ok_or_else(|| PlanError::MissingFunc(entry.name.clone()))?;
    let PropertyValue::Text(name) = func else {
        return Err(PlanError::FuncNotText(entry.name.clone()));
    };
    let kind = registry.lookup(name).ok_or_else(|| PlanError::UnknownOperation {
        node: entry.name.clone(),
        name: name.clone(),
    })?;
    if kind != expected {
        return Err(PlanError::WrongOperationKind {
            node: entry.name.clone(),
            name: name.clone(),
            expected: expected_name,
        });
    }
    let mut kwargs = entry.kwargs.clone();
    kwargs.shift_remove("func");
    Ok(OpCall {
        op: name.clone(),
        kind,
        kwargs,
    })
}

/// Assembles the data branch for a `data` or `preprocess` entry, recursing
/// through preprocess inputs.
fn build_data(entry: &ModelEntry, registry: &Registry) -> Result<DataStep, PlanError> {
    match entry.dtype {
        Category::Preprocess => {
            let call = op_call(entry, registry, OpKind::Preprocess, "a preprocess step")?;
            let inputs = entry
                .in_items
                .iter()
                .map(|e| build_data(e, registry))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DataStep::Preprocess { call, inputs })
        }
        Category::Data => Ok(DataStep::Source(op_call(
            entry,
            registry,
            OpKind::DataSource,
            "a data source",
        )?)),
        _ => Err(PlanError::BrokenModelChain(entry.name.clone())),
    }
}

/// Walks the model chain from the loss side upstream, collecting layers, and
/// resolves the data branch feeding the first layer. Layers come back in
/// forward order.
fn build_net(entry: &ModelEntry, registry: &Registry) -> Result<(Vec<OpCall>, DataStep), PlanError> {
    let mut layers = vec![op_call(entry, registry, OpKind::Layer, "a network layer")?];
    let mut current = entry;
    while current
        .in_items
        .first()
        .is_some_and(|up| up.dtype == Category::Model)
    {
        current = &current.in_items[0];
        layers.push(op_call(current, registry, OpKind::Layer, "a network layer")?);
    }
    let data_entry = current
        .in_items
        .first()
        .ok_or_else(|| PlanError::BrokenModelChain(current.name.clone()))?;
    let input = build_data(data_entry, registry)?;
    layers.reverse();
    Ok((layers, input))
}

fn get_int(kwargs: &Kwargs, key: &'static str) -> Result<i64, PlanError> {
    match kwargs.get(key) {
        Some(PropertyValue::Int(v)) => Ok(*v),
        Some(_) => Err(PlanError::HyperparameterType { key, expected: "int" }),
        None => Err(PlanError::MissingHyperparameter(key)),
    }
}

fn get_bool(kwargs: &Kwargs, key: &'static str) -> Result<bool, PlanError> {
    match kwargs.get(key) {
        Some(PropertyValue::Bool(v)) => Ok(*v),
        Some(_) => Err(PlanError::HyperparameterType { key, expected: "bool" }),
        None => Err(PlanError::MissingHyperparameter(key)),
    }
}

fn get_text(kwargs: &Kwargs, key: &'static str) -> Result<String, PlanError> {
    match kwargs.get(key) {
        Some(PropertyValue::Text(v)) => Ok(v.clone()),
        Some(_) => Err(PlanError::HyperparameterType { key, expected: "string" }),
        None => Err(PlanError::MissingHyperparameter(key)),
    }
}

fn hyperparameters(entry: &ModelEntry, registry: &Registry) -> Result<Hyperparameters, PlanError> {
    let trainer = op_call(entry, registry, OpKind::Trainer, "a trainer")?;
    Ok(Hyperparameters {
        epoch: get_int(&entry.kwargs, "epoch")?,
        batch_size: get_int(&entry.kwargs, "batch_size")?,
        shuffle: get_bool(&entry.kwargs, "shuffle")?,
        gpu: get_bool(&entry.kwargs, "gpu")?,
        seed: get_int(&entry.kwargs, "seed")?,
        model_path: get_text(&entry.kwargs, "model_path")?,
        trainer,
    })
}

/// Validates the document's topology and produces the training plan.
pub fn assemble(file: &SaveFile, registry: &Registry) -> Result<TrainingPlan, PlanError> {
    let mut hp_entry = None;
    let mut opt_entry = None;
    for model in &file.models {
        match model.dtype {
            Category::Hyperparameters => {
                if hp_entry.replace(model).is_some() {
                    return Err(PlanError::MultipleHyperparameters);
                }
            }
            Category::Optimizer => {
                if opt_entry.replace(model).is_some() {
                    return Err(PlanError::MultipleOptimizers);
                }
            }
            _ => {}
        }
    }
    let hp_entry = hp_entry.ok_or(PlanError::NoHyperparameters)?;
    let opt_entry = opt_entry.ok_or(PlanError::NoOptimizer)?;

    let hyperparameters = hyperparameters(hp_entry, registry)?;
    let optimizer = op_call(opt_entry, registry, OpKind::Optimizer, "an optimizer")?;

    let [loss_entry] = opt_entry.in_items.as_slice() else {
        return Err(PlanError::WrongOptimizerInputs(opt_entry.name.clone()));
    };
    if loss_entry.dtype != Category::Loss {
        return Err(PlanError::WrongOptimizerInputs(opt_entry.name.clone()));
    }
    let loss = op_call(loss_entry, registry, OpKind::Loss, "a loss")?;

    let [first, second] = loss_entry.in_items.as_slice() else {
        return Err(PlanError::WrongLossInputs(loss_entry.name.clone()));
    };
    let (net_entry, target_entry) = match (first.dtype, second.dtype) {
        (Category::Model, Category::Data | Category::Preprocess) => (first, second),
        (Category::Data | Category::Preprocess, Category::Model) => (second, first),
        _ => return Err(PlanError::WrongLossInputs(loss_entry.name.clone())),
    };

    let (layers, input) = build_net(net_entry, registry)?;
    let target = build_data(target_entry, registry)?;

    Ok(TrainingPlan {
        hyperparameters,
        optimizer,
        loss,
        layers,
        input,
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PropertyValue as V;
    use crate::document::SceneMeta;
    use indexmap::indexmap;

    fn entry(name: &str, dtype: Category, kwargs: Kwargs, in_items: Vec<ModelEntry>) -> ModelEntry {
        ModelEntry {
            name: name.to_owned(),
            dtype,
            pos: [0.0, 0.0],
            kwargs,
            in_items,
        }
    }

    fn func(name: &str) -> Kwargs {
        indexmap! { "func".to_owned() => V::Text(name.to_owned()) }
    }

    fn hp_entry() -> ModelEntry {
        entry(
            "DL_0",
            Category::Hyperparameters,
            indexmap! {
                "func".to_owned() => V::Text("DL".into()),
                "epoch".to_owned() => V::Int(100),
                "batch_size".to_owned() => V::Int(32),
                "shuffle".to_owned() => V::Bool(true),
                "gpu".to_owned() => V::Bool(false),
                "seed".to_owned() => V::Int(1),
                "model_path".to_owned() => V::Text("model.pt".into()),
            },
            Vec::new(),
        )
    }

    /// The fixed pipeline of the original standalone trainer: concatenated
    /// Boston features -> Linear/ReLU/Linear -> MSE -> SGD, price as target.
    fn boston_document() -> SaveFile {
        let x0 = entry("age_1", Category::Data, func("epics_get.get_boston_AGE"), Vec::new());
        let x1 = entry("b_2", Category::Data, func("epics_get.get_boston_B"), Vec::new());
        let mut cat_kwargs = func("cat");
        cat_kwargs.insert("dim".to_owned(), V::Int(1));
        let features = entry("cat_3", Category::Preprocess, cat_kwargs, vec![x0, x1]);

        let mut linear_in = func("torch.nn.Linear");
        linear_in.insert("in_features".to_owned(), V::Int(2));
        linear_in.insert("out_features".to_owned(), V::Int(20));
        let l1 = entry("Linear_4", Category::Model, linear_in, vec![features]);
        let relu = entry("ReLU_5", Category::Model, func("torch.nn.ReLU"), vec![l1]);
        let mut linear_out = func("torch.nn.Linear");
        linear_out.insert("in_features".to_owned(), V::Int(20));
        linear_out.insert("out_features".to_owned(), V::Int(1));
        let l2 = entry("Linear_6", Category::Model, linear_out, vec![relu]);

        let target = entry("price_7", Category::Data, func("epics_get.get_boston_PRICE"), Vec::new());
        let loss = entry("MSE_8", Category::Loss, func("torch.nn.MSELoss"), vec![l2, target]);

        let mut sgd = func("torch.optim.SGD");
        sgd.insert("lr".to_owned(), V::Float(0.1));
        let optimizer = entry("SGD_9", Category::Optimizer, sgd, vec![loss]);

        SaveFile {
            save_version: "0.1.0".to_owned(),
            module_version: "0.1.0".to_owned(),
            scene: SceneMeta { item_count: 10 },
            models: vec![optimizer, hp_entry()],
        }
    }

    #[test]
    fn assembles_the_boston_pipeline() {
        let plan = assemble(&boston_document(), &Registry::builtin()).unwrap();

        assert_eq!(plan.hyperparameters.epoch, 100);
        assert_eq!(plan.hyperparameters.batch_size, 32);
        assert!(plan.hyperparameters.shuffle);
        assert_eq!(plan.hyperparameters.model_path, "model.pt");
        assert_eq!(plan.optimizer.op, "torch.optim.SGD");
        assert_eq!(plan.optimizer.kwargs["lr"], V::Float(0.1));
        assert_eq!(plan.loss.op, "torch.nn.MSELoss");

        // Forward order: input-side layer first.
        let layer_ops: Vec<_> = plan.layers.iter().map(|l| l.op.as_str()).collect();
        assert_eq!(layer_ops, ["torch.nn.Linear", "torch.nn.ReLU", "torch.nn.Linear"]);
        assert_eq!(plan.layers[0].kwargs["in_features"], V::Int(2));
        assert_eq!(plan.layers[2].kwargs["out_features"], V::Int(1));

        // `func` never leaks into the call kwargs.
        assert!(plan.layers.iter().all(|l| !l.kwargs.contains_key("func")));

        match &plan.input {
            DataStep::Preprocess { call, inputs } => {
                assert_eq!(call.op, "cat");
                assert_eq!(call.kwargs["dim"], V::Int(1));
                assert_eq!(inputs.len(), 2);
            }
            other => panic!("expected preprocess input branch, got {other:?}"),
        }
        match &plan.target {
            DataStep::Source(call) => assert_eq!(call.op, "epics_get.get_boston_PRICE"),
            other => panic!("expected raw target source, got {other:?}"),
        }
    }

    #[test]
    fn hyperparameter_node_count_is_enforced() {
        let mut doc = boston_document();
        doc.models.retain(|m| m.dtype != Category::Hyperparameters);
        assert_eq!(
            assemble(&doc, &Registry::builtin()),
            Err(PlanError::NoHyperparameters)
        );

        let mut doc = boston_document();
        doc.models.push(hp_entry());
        assert_eq!(
            assemble(&doc, &Registry::builtin()),
            Err(PlanError::MultipleHyperparameters)
        );
    }

    #[test]
    fn every_boston_accessor_is_registered() {
        let registry = Registry::builtin();
        let fields = [
            "CRIM", "ZN", "INDUS", "CHAS", "NOX", "RM", "AGE", "DIS", "RAD", "TAX", "PTRATIO",
            "B", "LSTAT", "PRICE",
        ];
        for field in fields {
            let name = format!("epics_get.get_boston_{field}");
            assert_eq!(registry.lookup(&name), Some(OpKind::DataSource), "{name}");
        }
    }

    #[test]
    fn any_registered_accessor_works_as_a_target() {
        let mut doc = boston_document();
        let loss = &mut doc.models[0].in_items[0];
        loss.in_items[1].kwargs["func"] = V::Text("epics_get.get_boston_LSTAT".into());
        let plan = assemble(&doc, &Registry::builtin()).unwrap();
        match &plan.target {
            DataStep::Source(call) => assert_eq!(call.op, "epics_get.get_boston_LSTAT"),
            other => panic!("expected raw target source, got {other:?}"),
        }
    }

    #[test]
    fn unknown_operations_are_rejected() {
        let mut doc = boston_document();
        doc.models[0].kwargs["func"] = V::Text("os.system".into());
        let err = assemble(&doc, &Registry::builtin()).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownOperation {
                node: "SGD_9".into(),
                name: "os.system".into()
            }
        );
    }

    #[test]
    fn operation_kind_must_match_the_slot() {
        let mut doc = boston_document();
        doc.models[0].kwargs["func"] = V::Text("torch.nn.ReLU".into());
        let err = assemble(&doc, &Registry::builtin()).unwrap_err();
        assert!(matches!(err, PlanError::WrongOperationKind { .. }));
    }

    #[test]
    fn loss_needs_exactly_two_inputs() {
        let mut doc = boston_document();
        doc.models[0].in_items[0].in_items.pop();
        let err = assemble(&doc, &Registry::builtin()).unwrap_err();
        assert_eq!(err, PlanError::WrongLossInputs("MSE_8".into()));
    }

    #[test]
    fn model_without_upstream_breaks_the_chain() {
        let mut doc = boston_document();
        // Strip the feature branch feeding the first layer.
        let l2 = &mut doc.models[0].in_items[0].in_items[0];
        l2.in_items[0].in_items[0].in_items.clear();
        let err = assemble(&doc, &Registry::builtin()).unwrap_err();
        assert_eq!(err, PlanError::BrokenModelChain("Linear_4".into()));
    }

    #[test]
    fn missing_hyperparameter_key_is_reported() {
        let mut doc = boston_document();
        let hp = doc
            .models
            .iter_mut()
            .find(|m| m.dtype == Category::Hyperparameters)
            .unwrap();
        hp.kwargs.shift_remove("seed");
        assert_eq!(
            assemble(&doc, &Registry::builtin()),
            Err(PlanError::MissingHyperparameter("seed"))
        );
    }
}

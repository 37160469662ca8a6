//! Writes a tiny sequence-classification graph in the ONNX protobuf format.
//!
//! The graph scores a batch from the ids it actually sees:
//!
//! ```text
//! s      = sum(input_ids * attention_mask, axis = 1)     [batch, 1]
//! logits = s x WEIGHTS + BIAS                            [batch, 4]
//! ```

use std::path::Path;

/// Per-label weight applied to the id sum.
pub const WEIGHTS: [f32; 4] = [1e-3, 2e-3, -1e-3, 0.0];
pub const BIAS: [f32; 4] = [0.0, 0.0, 0.0, -1.0];

const FLOAT: i64 = 1;
const INT64: i64 = 7;
const ATTRIBUTE_INT: i64 = 2;

/// Logits the graph produces for one row of ids and mask.
pub fn expected_logits(input_ids: &[u32], attention_mask: &[u32]) -> [f32; 4] {
    let sum: f32 = input_ids
        .iter()
        .zip(attention_mask)
        .map(|(&id, &mask)| (id * mask) as f32)
        .sum();
    let mut logits = [0.0f32; 4];
    for (i, logit) in logits.iter_mut().enumerate() {
        *logit = sum * WEIGHTS[i] + BIAS[i];
    }
    logits
}

#[derive(Default)]
struct Message(Vec<u8>);

impl Message {
    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.0.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.0.push(value as u8);
    }

    fn key(&mut self, field: u64, wire_type: u64) {
        self.varint(field << 3 | wire_type);
    }

    fn int(mut self, field: u64, value: i64) -> Self {
        self.key(field, 0);
        self.varint(value as u64);
        self
    }

    fn bytes(mut self, field: u64, bytes: &[u8]) -> Self {
        self.key(field, 2);
        self.varint(bytes.len() as u64);
        self.0.extend_from_slice(bytes);
        self
    }

    fn string(self, field: u64, value: &str) -> Self {
        self.bytes(field, value.as_bytes())
    }

    fn message(self, field: u64, message: Message) -> Self {
        self.bytes(field, &message.0)
    }
}

fn node(op_type: &str, inputs: &[&str], output: &str, attributes: Vec<Message>) -> Message {
    let mut node = Message::default();
    for input in inputs {
        node = node.string(1, input);
    }
    node = node.string(2, output).string(3, output).string(4, op_type);
    for attribute in attributes {
        node = node.message(5, attribute);
    }
    node
}

fn int_attribute(name: &str, value: i64) -> Message {
    Message::default().string(1, name).int(3, value).int(20, ATTRIBUTE_INT)
}

fn tensor(name: &str, dims: &[i64], data_type: i64, raw: Vec<u8>) -> Message {
    let mut tensor = Message::default();
    for &dim in dims {
        tensor = tensor.int(1, dim);
    }
    tensor.int(2, data_type).string(8, name).bytes(9, &raw)
}

fn float_tensor(name: &str, dims: &[i64], values: &[f32]) -> Message {
    let raw = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    tensor(name, dims, FLOAT, raw)
}

enum Dim<'a> {
    Symbolic(&'a str),
    Fixed(i64),
}

fn value_info(name: &str, elem_type: i64, dims: &[Dim]) -> Message {
    let mut shape = Message::default();
    for dim in dims {
        let dimension = match dim {
            Dim::Fixed(n) => Message::default().int(1, *n),
            Dim::Symbolic(param) => Message::default().string(2, param),
        };
        shape = shape.message(1, dimension);
    }
    let tensor_type = Message::default().int(1, elem_type).message(2, shape);
    let type_proto = Message::default().message(1, tensor_type);
    Message::default().string(1, name).message(2, type_proto)
}

/// Serialized model bytes.
pub fn classifier_model() -> Vec<u8> {
    let batch_seq = [Dim::Symbolic("batch"), Dim::Symbolic("sequence")];
    let graph = Message::default()
        .message(1, node("Mul", &["input_ids", "attention_mask"], "masked_ids", vec![]))
        .message(1, node("Cast", &["masked_ids"], "masked_float", vec![int_attribute("to", FLOAT)]))
        .message(
            1,
            node("ReduceSum", &["masked_float", "axes"], "id_sum", vec![int_attribute("keepdims", 1)]),
        )
        .message(1, node("MatMul", &["id_sum", "weights"], "scores", vec![]))
        .message(1, node("Add", &["scores", "bias"], "logits", vec![]))
        .string(2, "tiny_classifier")
        .message(5, tensor("axes", &[1], INT64, 1i64.to_le_bytes().to_vec()))
        .message(5, float_tensor("weights", &[1, 4], &WEIGHTS))
        .message(5, float_tensor("bias", &[4], &BIAS))
        .message(11, value_info("input_ids", INT64, &batch_seq))
        .message(11, value_info("attention_mask", INT64, &batch_seq))
        .message(12, value_info("logits", FLOAT, &[Dim::Symbolic("batch"), Dim::Fixed(4)]));

    let opset = Message::default().string(1, "").int(2, 13);
    Message::default()
        .int(1, 8)
        .string(2, "symptom-classifier-tests")
        .message(7, graph)
        .message(8, opset)
        .0
}

pub fn write_classifier_model(path: &Path) {
    std::fs::write(path, classifier_model()).unwrap();
}

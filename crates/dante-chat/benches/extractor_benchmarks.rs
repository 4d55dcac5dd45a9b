//! Benchmarks for flow reply extraction.
//!
//! Every flow reply goes through `ReplyExtractor::extract`. The cases cover
//! the first strategy, the last one and a response that matches none, which
//! walks every path.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use dante_chat::ReplyExtractor;
use serde_json::{json, Value};

/// A realistic flow response with the reply at the deepest path.
fn nested_response(index: usize) -> Value {
    json!({
        "session_id": format!("session-{index}"),
        "outputs": [{
            "inputs": {"input_value": "¿Qué documentos necesito para inscribir una compraventa?"},
            "outputs": [{
                "results": {
                    "message": {
                        "text": format!(
                            "Para inscribir una compraventa en el Registro de la Propiedad \
                             necesitas la escritura pública otorgada ante notario, el \
                             justificante del impuesto correspondiente y, en su caso, la \
                             comunicación al ayuntamiento a efectos de plusvalía. Ref. {index}."
                        ),
                        "sender": "Machine",
                        "sender_name": "AI"
                    }
                },
                "artifacts": {"message": "ignored"},
                "messages": [{"message": "ignored", "sender": "Machine"}]
            }]
        }]
    })
}

fn flat_response(index: usize) -> Value {
    json!({"message": format!("Respuesta breve {index}")})
}

fn unrecognized_response(index: usize) -> Value {
    json!({"data": {"answer": format!("sin formato {index}")}, "outputs": []})
}

fn bench_reply_extraction(c: &mut Criterion) {
    let nested: Vec<Value> = (0..256).map(nested_response).collect();
    let flat: Vec<Value> = (0..256).map(flat_response).collect();
    let unrecognized: Vec<Value> = (0..256).map(unrecognized_response).collect();

    let mut group = c.benchmark_group("reply_extraction");
    group.sample_size(200);
    group.measurement_time(Duration::from_secs(5));

    for (name, responses) in [
        ("first_strategy", &nested),
        ("last_strategy", &flat),
        ("unrecognized", &unrecognized),
    ] {
        group.bench_function(name, |b| {
            let mut idx = 0usize;
            b.iter(|| {
                let reply = ReplyExtractor::extract(&responses[idx % responses.len()]);
                idx += 1;
                reply
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reply_extraction);
criterion_main!(benches);

//! 规则引擎性能基准测试
//!
//! 覆盖单个操作符评估、条件编译以及实体触发的端到端吞吐。

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rule_engine::evaluator::ConditionEvaluator;
use rule_engine::{ActionInvocation, ConditionCompiler, EntityRegistry, Operator, RuleEngine};
use serde_json::{Map, Value, json};
use std::hint::black_box;

fn occupancy_rule(room: usize) -> Value {
    json!({
        "name": format!("room {}", room),
        "description": "",
        "meta": {},
        "condition": {
            "$and": [
                {"$any->device||room": {"id": room, "$properties": {"count": [{">": 0}]}}},
                {"$any->utc||clock": {"$properties": {"hours": [{"between": [18, 23]}]}}}
            ]
        },
        "action": {
            "$class": "single",
            "$category": "service",
            "$data": {
                "$enter": {"service_name": "light.turn_on", "target_ids": ["$room.id"]},
                "$exit": {"service_name": "light.turn_off", "target_ids": ["$room.id"]}
            }
        }
    })
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// 操作符评估基准
fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("operators");
    let number = json!(1000);
    let text = json!("living-room-2");

    group.bench_function("gt", |b| {
        b.iter(|| ConditionEvaluator::evaluate(black_box(Some(&number)), Operator::Gt, &json!(500)))
    });
    group.bench_function("between", |b| {
        let range = json!([0, 2000]);
        b.iter(|| ConditionEvaluator::evaluate(black_box(Some(&number)), Operator::Between, &range))
    });
    group.bench_function("regex", |b| {
        let pattern = json!("living-room-\\d+");
        b.iter(|| ConditionEvaluator::evaluate(black_box(Some(&text)), Operator::Regex, &pattern))
    });

    group.finish();
}

/// 条件编译基准
fn bench_compile(c: &mut Criterion) {
    let mut registry = EntityRegistry::new();
    registry.register("device", ["id"]);
    let compiler = ConditionCompiler::new(&registry);
    let condition = occupancy_rule(1)["condition"].clone();

    c.bench_function("compile_condition", |b| {
        b.iter(|| compiler.compile(black_box(&condition)))
    });
}

/// 实体触发吞吐基准（不同规则数量）
fn bench_trigger(c: &mut Criterion) {
    let mut group = c.benchmark_group("trigger");

    for rules in [1usize, 10, 50] {
        let mut engine = RuleEngine::new();
        engine.register_entity_type("device", ["id"]);
        engine.register_action_handler("service", |_: &ActionInvocation| Ok(()));
        let payloads: Vec<Value> = (1..=rules).map(occupancy_rule).collect();
        if engine.add_rules(&payloads).is_err() || engine.start().is_err() {
            continue;
        }
        let _ = engine.trigger("utc", fields(json!({"hours": 20, "minutes": 0})));

        group.throughput(Throughput::Elements(2));
        group.bench_with_input(BenchmarkId::from_parameter(rules), &rules, |b, &rules| {
            let mut count = 0i64;
            b.iter(|| {
                count = 1 - count;
                let room = (count as usize % rules) + 1;
                let _ = engine.trigger(
                    "device",
                    fields(json!({"id": room, "count": count})),
                );
                let _ = engine.trigger(
                    "device",
                    fields(json!({"id": room, "count": 1 - count})),
                );
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_operators, bench_compile, bench_trigger);
criterion_main!(benches);

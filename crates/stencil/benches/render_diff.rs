//! Render and diff throughput on a list page.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use stencil::{Template, Value};

const SOURCE: &str = r#"{{define "row"}}<li class="{{if .Done}}done{{end}}">{{.Title}}</li>{{end -}}
<h1>{{.Title}}</h1><ul>{{range .Todos}}{{template "row" .}}{{end}}</ul><p>{{len .Todos}} left</p>"#;

fn todos(count: usize, done_every: usize) -> Value {
    let todos: Vec<_> = (0..count)
        .map(|index| json!({"Title": format!("Item {index}"), "Done": index % done_every == 0}))
        .collect();
    Value::from(json!({"Title": "Todos", "Todos": todos}))
}

fn bench_render(c: &mut Criterion) {
    let template = Template::compile(SOURCE).unwrap();
    let mut group = c.benchmark_group("render");
    for n in [10, 100, 1000] {
        let data = todos(n, 3);
        group.bench_with_input(BenchmarkId::new("tree", n), &data, |b, data| {
            b.iter(|| template.render(black_box(data)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("text", n), &data, |b, data| {
            b.iter(|| template.execute(black_box(data)).unwrap());
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let template = Template::compile(SOURCE).unwrap();
    let mut group = c.benchmark_group("diff");
    for n in [10, 100, 1000] {
        let before = template.render(&todos(n, 3)).unwrap();
        // Done flags flip on many items.
        let toggled = template.render(&todos(n, 4)).unwrap();
        // One appended item.
        let appended = template.render(&todos(n + 1, 3)).unwrap();
        group.bench_with_input(BenchmarkId::new("unchanged", n), &before, |b, tree| {
            b.iter(|| stencil::diff(black_box(tree), black_box(tree)));
        });
        group.bench_with_input(BenchmarkId::new("toggled", n), &toggled, |b, tree| {
            b.iter(|| stencil::diff(black_box(&before), black_box(tree)));
        });
        group.bench_with_input(BenchmarkId::new("appended", n), &appended, |b, tree| {
            b.iter(|| stencil::diff(black_box(&before), black_box(tree)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_render, bench_diff);
criterion_main!(benches);

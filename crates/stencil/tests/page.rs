//! Page state under concurrent renders and updates.

mod support;

use serde_json::json;
use std::sync::Arc;
use std::thread;
use stencil::{Application, ClientView, Error, Template, Value};
use support::{data, init_logger};

fn application() -> Application {
    let template = Template::compile("<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul><p>{{len .Items}}</p>").unwrap();
    Application::new(template, || Value::from(json!({"Items": []})))
}

#[test]
fn updates_of_one_page_are_serialized() {
    init_logger();
    let page = Arc::new(application().new_page().unwrap());
    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let page = Arc::clone(&page);
            thread::spawn(move || {
                for step in 0..25 {
                    let items: Vec<i64> = (0..(worker + step) % 7).collect();
                    page.update(data(json!({ "Items": items }))).unwrap();
                    let _ = page.render();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(page.version(), 200);
    let committed = page.data();
    let expected = page.template().execute(&committed).unwrap();
    assert_eq!(page.render().render(), expected);
}

#[test]
fn a_client_following_every_update_stays_in_sync() {
    init_logger();
    let page = application().new_page().unwrap();
    let mut client = ClientView::from_wire(&stencil::to_wire(&page.render())).unwrap();
    for step in [3_i64, 5, 1, 0, 4, 4, 2] {
        let items: Vec<String> = (0..step).map(|item| format!("item {}", (item * step) % 5)).collect();
        let fragments = page.update(data(json!({ "Items": items }))).unwrap();
        client.apply_all(&fragments).unwrap();
        assert_eq!(client.render(), page.render().render());
    }
}

#[test]
fn pages_share_one_template() {
    let application = application();
    let pages: Vec<_> = (0..4).map(|_| application.new_page().unwrap()).collect();
    thread::scope(|scope| {
        for (index, page) in pages.iter().enumerate() {
            scope.spawn(move || {
                page.update(data(json!({ "Items": vec![index; index] }))).unwrap();
            });
        }
    });
    for (index, page) in pages.iter().enumerate() {
        assert!(Arc::ptr_eq(page.template(), application.template()));
        assert_eq!(page.render().render().matches("<li>").count(), index);
    }
}

#[test]
fn cancelled_updates_leave_no_trace() {
    let page = application().new_page().unwrap();
    let pending = page.prepare(data(json!({"Items": [1]}))).unwrap();
    drop(pending);
    assert_eq!(page.version(), 0);

    let first = page.prepare(data(json!({"Items": [1]}))).unwrap();
    let second = page.prepare(data(json!({"Items": [2]}))).unwrap();
    page.commit(first).unwrap();
    assert!(matches!(page.commit(second), Err(Error::StaleUpdate { .. })));
    assert_eq!(page.render().render(), "<ul><li>1</li></ul><p>1</p>");
}

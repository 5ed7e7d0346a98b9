//! Standard response envelope helpers.

use crate::filter::Page;
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: ListMeta,
}

/// `count` is the total number of matching rows, not the length of this page.
#[derive(Serialize)]
pub struct ListMeta {
    pub count: u64,
    pub limit: u32,
    pub offset: u32,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::CREATED, Json(SuccessOne { data }))
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data }))
}

pub fn success_page<T: Serialize>(data: Vec<T>, count: u64, page: Page) -> (StatusCode, Json<SuccessMany<T>>) {
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: ListMeta {
                count,
                limit: page.limit,
                offset: page.offset,
            },
        }),
    )
}

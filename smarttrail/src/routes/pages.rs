use axum::response::Html;

// Templates are compiled into the binary so the server runs from any
// working directory.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../templates/index.html"))
}

pub async fn rent() -> Html<&'static str> {
    Html(include_str!("../../templates/rent.html"))
}

pub async fn activate() -> Html<&'static str> {
    Html(include_str!("../../templates/activate.html"))
}

pub async fn dashboard() -> Html<&'static str> {
    Html(include_str!("../../templates/dashboard.html"))
}

pub async fn end_ride() -> Html<&'static str> {
    Html(include_str!("../../templates/end_ride.html"))
}

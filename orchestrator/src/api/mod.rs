use std::sync::Arc;

use warp::{Filter, Rejection, Reply};

use crate::agents::controller::IterationController;

mod search;
mod suggestions;

pub fn routes(
    controller: Arc<IterationController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));

    let search_route = api
        .and(warp::path("search"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller(controller.clone()))
        .and_then(search::handle_search);

    let followup_route = api
        .and(warp::path("followup"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller(controller))
        .and_then(search::handle_followup);

    let suggestions_route = api
        .and(warp::path("suggestions"))
        .and(warp::path::end())
        .and(warp::get())
        .and_then(suggestions::handle_suggestions);

    search_route.or(followup_route).or(suggestions_route)
}

fn with_controller(
    controller: Arc<IterationController>,
) -> impl Filter<Extract = (Arc<IterationController>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

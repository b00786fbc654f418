use foundations::telemetry::metrics::{metrics, Counter, Gauge, HistogramBuilder, TimeHistogram};

#[metrics]
pub mod http_server {
  /// Number of HTTP requests.
  pub fn requests_total(endpoint_name: &'static str) -> Counter;

  /// Number of successful HTTP requests.
  pub fn requests_success_total(endpoint_name: &'static str) -> Counter;

  /// Number of failed requests.
  pub fn requests_failed_total(endpoint_name: &'static str) -> Counter;

  /// Number of requests made to LeetCode and the secondary stats providers.
  pub fn upstream_requests_total(endpoint_name: &'static str) -> Counter;

  /// Number of failed requests made to LeetCode and the secondary stats providers.
  pub fn upstream_requests_failed_total(endpoint_name: &'static str, status_code: u16) -> Counter;

  /// Distribution of response times for upstream requests.
  #[ctor = HistogramBuilder {
    buckets: &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
  }]
  pub fn upstream_response_time_seconds(endpoint_name: &'static str) -> TimeHistogram;

  /// Number of single-user refreshes by outcome.
  pub fn refresh_total(outcome: &'static str) -> Counter;

  /// Number of users in the roster as of the last full listing.
  pub fn roster_users() -> Gauge;
}
